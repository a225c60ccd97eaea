use clap::{Args, Parser, Subcommand};
use ledstrip_proto::Brightness;

#[derive(Parser, Debug)]
#[command(name = "ledstrip-server")]
#[command(about = "HTTP control plane for an addressable LED strip")]
pub struct Cli {
    /// Config file layered under LEDSTRIP_* environment variables
    #[arg(long, short, global = true, env = "LEDSTRIP_CONFIG_FILE")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP API (default)
    Serve(ServeArgs),
    /// Run a single animation script, speaking the session protocol on
    /// stdin/stdout. Launched by the server; not meant to be run by hand.
    Animate(AnimateArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to listen on, e.g. 0.0.0.0:45451
    #[arg(long)]
    pub bind: Option<String>,

    /// Number of LEDs on the strip
    #[arg(long)]
    pub led_count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct AnimateArgs {
    #[arg(long)]
    pub led_count: usize,

    /// 0-100 or "auto"
    #[arg(long, default_value_t = Brightness::FULL)]
    pub brightness: Brightness,

    #[arg(long, allow_hyphen_values = true)]
    pub script: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn animate_arguments_parse() {
        let cli = Cli::parse_from([
            "ledstrip-server",
            "animate",
            "--led-count",
            "10",
            "--brightness",
            "auto",
            "--script",
            "-1;",
        ]);
        let Some(Commands::Animate(args)) = cli.command else {
            panic!("expected animate");
        };
        assert_eq!(args.led_count, 10);
        assert_eq!(args.brightness, Brightness::Auto);
        assert_eq!(args.script, "-1;");
    }

    #[test]
    fn out_of_range_brightness_is_rejected() {
        let result = Cli::try_parse_from([
            "ledstrip-server",
            "animate",
            "--led-count",
            "1",
            "--brightness",
            "150",
            "--script",
            "",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn serve_is_optional() {
        let cli = Cli::parse_from(["ledstrip-server", "--config", "ledstrip.toml"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config.as_deref(), Some("ledstrip.toml"));
    }
}

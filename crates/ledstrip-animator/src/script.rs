//! Rhai sandbox for animation scripts.
//!
//! Scripts see exactly three things:
//! - `led_controller` - handle onto the animator's LED surface
//! - `led_amount` - number of LEDs on the strip
//! - `print(..)` / `debug(..)` - routed to the animator's log on stderr
//!
//! Plus two helpers: `rgb(r, g, b)` builds a color map and `sleep(ms)` pauses
//! the script between frames.
//!
//! Controller methods:
//! - `set_brightness(level)` - 0..=100 or `"auto"`
//! - `get_brightness()`
//! - `set_led(index, color)`, `fill_leds(color)`, `clear_leds()`
//! - `get_led_strip()` - last rendered frame as an array of color maps
//! - `show()` - render and publish the current buffer
//!
//! Mutating methods return the controller so calls chain:
//! `led_controller.fill_leds(rgb(255, 0, 0)).show();`

use std::{sync::Arc, time::Duration};

use ledstrip_proto::{Brightness, LedColor};
use ledstrip_surface::LedSurface;
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, Position, Scope, INT};
use tokio::runtime::Handle;
use tracing::{debug, info};

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// Script-side proxy for the LED surface.
#[derive(Clone)]
pub struct ScriptLeds {
    surface: Arc<LedSurface>,
    runtime: Handle,
}

impl ScriptLeds {
    pub fn new(surface: Arc<LedSurface>, runtime: Handle) -> Self {
        Self { surface, runtime }
    }

    fn set_brightness(&mut self, brightness: Brightness) -> ScriptLeds {
        self.surface.set_brightness(brightness);
        self.clone()
    }

    fn set_led(&mut self, index: INT, color: Map) -> ScriptResult<ScriptLeds> {
        let color = color_from_map(&color)?;
        let index = usize::try_from(index).map_err(|_| format!("led index {index} is negative"))?;
        self.surface
            .set_led(index, color)
            .map_err(|err| err.to_string())?;
        Ok(self.clone())
    }

    fn fill_leds(&mut self, color: Map) -> ScriptResult<ScriptLeds> {
        let color = color_from_map(&color)?;
        self.surface.fill_leds(color);
        Ok(self.clone())
    }

    fn clear_leds(&mut self) -> ScriptLeds {
        self.surface.clear_leds();
        self.clone()
    }

    fn get_led_strip(&mut self) -> Array {
        self.surface
            .led_strip()
            .iter()
            .map(|color| Dynamic::from_map(color_to_map(*color)))
            .collect()
    }

    fn show(&mut self) -> ScriptResult<ScriptLeds> {
        // Scripts run on a blocking thread, so waiting on the runtime is safe here.
        self.runtime
            .block_on(self.surface.show())
            .map_err(|err| err.to_string())?;
        Ok(self.clone())
    }
}

/// Build an engine with no ambient authority: no module imports, no `eval`,
/// bounded nesting and collection sizes.
pub fn sandboxed_engine() -> Engine {
    let mut engine = Engine::new();

    engine.set_max_expr_depths(64, 64);
    engine.set_max_call_levels(64);
    engine.set_max_modules(0);
    engine.set_max_string_size(10_000);
    engine.set_max_array_size(100_000);
    engine.set_max_map_size(500);
    engine.disable_symbol("eval");

    engine.on_print(|text| info!(target: "script", "{text}"));
    engine.on_debug(|text, source, pos| {
        debug!(target: "script", source = source.unwrap_or("script"), position = %pos, "{text}");
    });

    engine
        .register_type_with_name::<ScriptLeds>("LedController")
        .register_fn("set_brightness", |leds: &mut ScriptLeds, level: INT| -> ScriptResult<ScriptLeds> {
            let brightness = Brightness::level(level).map_err(|err| err.to_string())?;
            Ok(leds.set_brightness(brightness))
        })
        .register_fn(
            "set_brightness",
            |leds: &mut ScriptLeds, level: ImmutableString| -> ScriptResult<ScriptLeds> {
                let brightness = level.as_str().parse::<Brightness>().map_err(|err| err.to_string())?;
                Ok(leds.set_brightness(brightness))
            },
        )
        .register_fn("get_brightness", |leds: &mut ScriptLeds| -> Dynamic {
            match leds.surface.brightness() {
                Brightness::Level(level) => Dynamic::from(level as INT),
                Brightness::Auto => "auto".into(),
            }
        })
        .register_fn("set_led", ScriptLeds::set_led)
        .register_fn("fill_leds", ScriptLeds::fill_leds)
        .register_fn("clear_leds", ScriptLeds::clear_leds)
        .register_fn("get_led_strip", ScriptLeds::get_led_strip)
        .register_fn("show", ScriptLeds::show);

    engine.register_fn("rgb", |red: INT, green: INT, blue: INT| -> ScriptResult<Map> {
        Ok(color_to_map(LedColor::new(
            channel("red", red)?,
            channel("green", green)?,
            channel("blue", blue)?,
        )))
    });
    engine.register_fn("sleep", |millis: INT| {
        if millis > 0 {
            std::thread::sleep(Duration::from_millis(millis as u64));
        }
    });

    engine
}

/// Run `source` to completion with the controller and strip length bound.
pub fn execute(engine: &Engine, leds: ScriptLeds, led_amount: usize, source: &str) -> ScriptResult<()> {
    let mut scope = Scope::new();
    scope.push_constant("led_controller", leds);
    scope.push_constant("led_amount", led_amount as INT);
    engine.run_with_scope(&mut scope, source)
}

fn channel(name: &str, value: INT) -> ScriptResult<u8> {
    u8::try_from(value).map_err(|_| {
        Box::new(EvalAltResult::ErrorRuntime(
            format!("color channel '{name}' must be between 0 and 255 (received {value})").into(),
            Position::NONE,
        ))
    })
}

fn color_from_map(map: &Map) -> ScriptResult<LedColor> {
    let read = |name: &str| -> ScriptResult<u8> {
        let value = map
            .get(name)
            .ok_or_else(|| format!("color is missing the '{name}' channel"))?
            .as_int()
            .map_err(|_| format!("color channel '{name}' must be an integer"))?;
        channel(name, value)
    };
    Ok(LedColor::new(read("red")?, read("green")?, read("blue")?))
}

fn color_to_map(color: LedColor) -> Map {
    let mut map = Map::new();
    map.insert("red".into(), Dynamic::from(color.red as INT));
    map.insert("green".into(), Dynamic::from(color.green as INT));
    map.insert("blue".into(), Dynamic::from(color.blue as INT));
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str, surface: Arc<LedSurface>) -> ScriptResult<()> {
        let engine = sandboxed_engine();
        let leds = ScriptLeds::new(surface.clone(), Handle::current());
        let amount = surface.led_count();
        execute(&engine, leds, amount, source)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn chained_calls_render_the_strip() {
        let surface = Arc::new(LedSurface::new(5));
        let script_surface = surface.clone();
        tokio::task::spawn_blocking(move || {
            run(
                r#"
                    led_controller.set_brightness(100).fill_leds(rgb(0, 0, 255)).show();
                    led_controller.set_led(led_amount - 1, #{ red: 10, green: 20, blue: 30 }).show();
                "#,
                script_surface,
            )
        })
        .await
        .unwrap()
        .unwrap();

        let strip = surface.led_strip();
        assert_eq!(strip.get(0), Some(LedColor::new(0, 0, 255)));
        assert_eq!(strip.get(4), Some(LedColor::new(10, 20, 30)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_writes_raise_script_errors() {
        let surface = Arc::new(LedSurface::new(2));
        let cases = [
            "led_controller.set_led(2, rgb(1, 1, 1));",
            "led_controller.set_led(-1, rgb(1, 1, 1));",
            "led_controller.fill_leds(#{ red: 1, green: 1 });",
            "rgb(256, 0, 0);",
            "led_controller.set_brightness(101);",
            r#"led_controller.set_brightness("blinding");"#,
        ];
        for source in cases {
            let script_surface = surface.clone();
            let result = tokio::task::spawn_blocking(move || run(source, script_surface))
                .await
                .unwrap();
            assert!(result.is_err(), "expected failure for {source}");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn brightness_round_trips_through_the_script() {
        let surface = Arc::new(LedSurface::new(1));
        let script_surface = surface.clone();
        tokio::task::spawn_blocking(move || {
            run(
                r#"
                    led_controller.set_brightness("auto");
                    if led_controller.get_brightness() != "auto" { throw "expected auto"; }
                    led_controller.set_brightness(25);
                    if led_controller.get_brightness() != 25 { throw "expected 25"; }
                    let strip = led_controller.get_led_strip();
                    if strip.len() != led_amount { throw "wrong strip length"; }
                "#,
                script_surface,
            )
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(surface.brightness(), Brightness::Level(25));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sandbox_blocks_imports_and_eval() {
        for source in [r#"import "secrets" as s;"#, r#"eval("40 + 2");"#] {
            let surface = Arc::new(LedSurface::new(1));
            let result = tokio::task::spawn_blocking(move || run(source, surface))
                .await
                .unwrap();
            assert!(result.is_err(), "expected sandbox to reject {source}");
        }
    }
}

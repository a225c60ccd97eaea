use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl LedColor {
    pub const OFF: LedColor = LedColor::new(0, 0, 0);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Scale every channel by `level` percent, rounding to the nearest value.
    pub fn scaled(self, level: u8) -> Self {
        let level = u32::from(level.min(100));
        let scale = |channel: u8| ((u32::from(channel) * level + 50) / 100) as u8;
        Self {
            red: scale(self.red),
            green: scale(self.green),
            blue: scale(self.blue),
        }
    }

    pub fn channel_sum(self) -> u32 {
        u32::from(self.red) + u32::from(self.green) + u32::from(self.blue)
    }
}

/// Ordered pixel sequence of a strip. The surface that produces it fixes the
/// length; the type itself does not.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedStrip(Vec<LedColor>);

impl LedStrip {
    pub fn filled(len: usize, color: LedColor) -> Self {
        Self(vec![color; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<LedColor> {
        self.0.get(index).copied()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LedColor> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[LedColor] {
        &self.0
    }
}

impl From<Vec<LedColor>> for LedStrip {
    fn from(colors: Vec<LedColor>) -> Self {
        Self(colors)
    }
}

impl FromIterator<LedColor> for LedStrip {
    fn from_iter<I: IntoIterator<Item = LedColor>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a LedStrip {
    type Item = &'a LedColor;
    type IntoIter = std::slice::Iter<'a, LedColor>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

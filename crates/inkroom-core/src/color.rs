//! Color parsing for stroke styles.

use peniko::Color;
use serde::{Deserialize, Serialize};

/// Plain RGBA8 color, comparable and serializable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    pub const fn white() -> Self {
        Self::new(255, 255, 255, 255)
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` (the `#` is optional).
    pub fn parse_hex(input: &str) -> Option<Self> {
        let hex = input.trim().trim_start_matches('#');
        if !hex.is_ascii() {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        match hex.len() {
            3 => {
                let mut rgb = [0u8; 3];
                for (slot, c) in rgb.iter_mut().zip(hex.chars()) {
                    *slot = channel(&c.to_string())? * 17;
                }
                Some(Self::new(rgb[0], rgb[1], rgb[2], 255))
            }
            6 => Some(Self::new(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
                255,
            )),
            8 => Some(Self::new(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
                channel(&hex[6..8])?,
            )),
            _ => None,
        }
    }

    /// Scale the alpha channel by `factor`.
    pub fn fade(self, factor: f64) -> Self {
        let alpha = (f64::from(self.a) * factor.clamp(0.0, 1.0)).round() as u8;
        Self { a: alpha, ..self }
    }
}

impl From<Color> for Rgba {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self::new(rgba.r, rgba.g, rgba.b, rgba.a)
    }
}

impl From<Rgba> for Color {
    fn from(color: Rgba) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// Parse a stroke color, falling back to black.
pub fn parse_color(input: &str) -> Rgba {
    Rgba::parse_hex(input).unwrap_or_else(|| {
        log::debug!("Unparseable color {:?}, using black", input);
        Rgba::black()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(Rgba::parse_hex("#ffffff"), Some(Rgba::white()));
        assert_eq!(Rgba::parse_hex("f80"), Some(Rgba::new(255, 136, 0, 255)));
        assert_eq!(Rgba::parse_hex("#11223344"), Some(Rgba::new(0x11, 0x22, 0x33, 0x44)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(Rgba::parse_hex("#12"), None);
        assert_eq!(Rgba::parse_hex("#gggggg"), None);
        assert_eq!(Rgba::parse_hex("#ééé"), None);
        assert_eq!(parse_color("red"), Rgba::black());
    }

    #[test]
    fn test_fade() {
        assert_eq!(Rgba::white().fade(0.5).a, 128);
        assert_eq!(Rgba::white().fade(2.0).a, 255);
    }

    #[test]
    fn test_peniko_roundtrip() {
        let color = Rgba::new(12, 34, 56, 255);
        assert_eq!(Rgba::from(Color::from(color)), color);
    }
}

use crate::panel::Color;

const DARK: u8 = 32;
const LIGHT: u8 = 224;
const HIGH: u8 = 200;
const LOW: u8 = 100;

/// Maps one RGB pixel to the nearest panel palette entry.
///
/// Near-black and near-white are tested before any hue so desaturated
/// pixels never pick up a colour. Pixels matching no rule fall back to
/// black or white by mean brightness.
pub fn rgb_to_palette(r: u8, g: u8, b: u8) -> Color {
    if r < DARK && g < DARK && b < DARK {
        return Color::Black;
    }
    if r > LIGHT && g > LIGHT && b > LIGHT {
        return Color::White;
    }

    match (r > HIGH, g > HIGH, b > HIGH, r < LOW, g < LOW, b < LOW) {
        (true, true, _, _, _, true) => Color::Yellow,
        (true, _, _, _, true, true) => Color::Red,
        (_, _, true, true, true, _) => Color::Blue,
        (_, true, _, true, _, true) => Color::Green,
        _ => {
            let brightness = (u16::from(r) + u16::from(g) + u16::from(b)) / 3;
            if brightness > 127 {
                Color::White
            } else {
                Color::Black
            }
        }
    }
}

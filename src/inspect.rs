use crate::cifar_dataset::class_name;
use crate::error::Result;
use crate::optim::argmax;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::prelude::*;
use std::fmt;
use std::io::{self, BufRead, Write};
use thiserror::Error;

pub const PROMPT: &str = "Lütfen tahmin gerçekleştirmek istediğiniz indeksi girin: ";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvalidInputError {
    #[error("`{0}` is not a non-negative integer")]
    NotADigit(String),
    #[error("index {index} is out of range (must be below {upper_bound})")]
    OutOfRange { index: String, upper_bound: usize },
}

/// Validate one line of user input as an index into a set of `upper_bound` items.
///
/// Only ASCII digits are accepted, so signs, spaces and the empty string are rejected as
/// `NotADigit`. Values at or above `upper_bound`, including ones too large for `usize`, are
/// `OutOfRange`. One trailing line terminator is ignored.
pub fn parse_index(input: &str, upper_bound: usize) -> std::result::Result<usize, InvalidInputError> {
    let input = input
        .strip_suffix('\n')
        .map(|s| s.strip_suffix('\r').unwrap_or(s))
        .unwrap_or(input);

    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InvalidInputError::NotADigit(input.to_string()));
    }

    match input.parse::<usize>() {
        Ok(index) if index < upper_bound => Ok(index),
        _ => Err(InvalidInputError::OutOfRange {
            index: input.to_string(),
            upper_bound,
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectorState {
    AwaitingInput,
    Valid(usize),
}

/// Prompt on `writer` until `reader` yields a valid index. Invalid lines are silently
/// re-prompted. Running out of input is an `UnexpectedEof` error.
pub fn select_index<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    upper_bound: usize,
) -> io::Result<usize> {
    let mut state = SelectorState::AwaitingInput;
    let mut line = String::new();
    loop {
        match state {
            SelectorState::Valid(index) => return Ok(index),
            SelectorState::AwaitingInput => {
                write!(writer, "{PROMPT}")?;
                writer.flush()?;

                line.clear();
                if reader.read_line(&mut line)? == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "input closed before a valid index was entered",
                    ));
                }
                state = match parse_index(&line, upper_bound) {
                    Ok(index) => SelectorState::Valid(index),
                    Err(e) => {
                        log::debug!("rejected index input: {e}");
                        SelectorState::AwaitingInput
                    }
                };
            }
        }
    }
}

/// Predicted and actual class of one test sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inspection {
    pub index: usize,
    pub predicted: usize,
    pub actual: usize,
}

impl Inspection {
    /// `index` must come from [`select_index`] with the test set size as bound.
    pub fn new(predictions: &Array2<f32>, labels: &[u8], index: usize) -> Inspection {
        Inspection {
            index,
            predicted: argmax(predictions.row(index)),
            actual: labels[index] as usize,
        }
    }

    pub fn predicted_name(&self) -> &'static str {
        class_name(self.predicted)
    }

    pub fn actual_name(&self) -> &'static str {
        class_name(self.actual)
    }
}

impl fmt::Display for Inspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Real Value: {} - Predicted Value: {}",
            self.actual_name(),
            self.predicted_name()
        )
    }
}

fn to_rgb(image: ArrayView3<f32>, y: usize, x: usize) -> [u8; 3] {
    let mut px = [0u8; 3];
    for (c, v) in px.iter_mut().enumerate() {
        *v = (image[(c, y, x)].clamp(0.0, 1.0) * 255.0).round() as u8;
    }
    px
}

/// Draw a (3, H, W) image with 24-bit color half blocks, two pixel rows per text line.
pub fn render_ansi(image: ArrayView3<f32>) -> String {
    let (_, h, w) = image.dim();
    let mut out = String::new();
    for y in (0..h).step_by(2) {
        for x in 0..w {
            let [r, g, b] = to_rgb(image, y, x);
            out.push_str(&format!("\x1b[38;2;{r};{g};{b}m"));
            if y + 1 < h {
                let [r, g, b] = to_rgb(image, y + 1, x);
                out.push_str(&format!("\x1b[48;2;{r};{g};{b}m"));
            }
            out.push('▀');
        }
        out.push_str("\x1b[0m\n");
    }
    out
}

/// Write a (3, H, W) image as a PNG, each pixel blown up to `scale` x `scale`.
pub fn save_png(image: ArrayView3<f32>, path: &str, scale: u32) -> Result<()> {
    let (_, h, w) = image.dim();
    let img = RgbImage::from_fn(w as u32, h as u32, |x, y| {
        Rgb(to_rgb(image, y as usize, x as usize))
    });
    let scale = scale.max(1);
    let img = imageops::resize(&img, w as u32 * scale, h as u32 * scale, FilterType::Nearest);
    img.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_in_range_digits() {
        assert_eq!(parse_index("0", 10), Ok(0));
        assert_eq!(parse_index("9", 10), Ok(9));
        assert_eq!(parse_index("42\n", 10_000), Ok(42));
        assert_eq!(parse_index("7\r\n", 10), Ok(7));
        assert_eq!(parse_index("007", 10), Ok(7));
    }

    #[test]
    fn rejects_non_digits() {
        for input in ["", "\n", "abc", "-1", "+3", " 5", "5 ", "4.0", "١"] {
            assert!(
                matches!(parse_index(input, 10), Err(InvalidInputError::NotADigit(_))),
                "{input:?} should not parse"
            );
        }
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(matches!(
            parse_index("10", 10),
            Err(InvalidInputError::OutOfRange { upper_bound: 10, .. })
        ));
        assert!(matches!(
            parse_index("99999999999999999999999999", 10),
            Err(InvalidInputError::OutOfRange { .. })
        ));
        assert!(matches!(
            parse_index("0", 0),
            Err(InvalidInputError::OutOfRange { .. })
        ));
    }

    #[test]
    fn ansi_render_has_one_line_per_two_rows() {
        let image = Array3::<f32>::ones((3, 5, 4));
        let text = render_ansi(image.view());
        assert_eq!(text.lines().count(), 3);
        assert_eq!(text.matches('▀').count(), 12);
        assert!(text.contains("\x1b[38;2;255;255;255m"));
    }
}

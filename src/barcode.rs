// src/barcode.rs
//! Printable label rendering for scan codes.

use barcoders::generators::svg::SVG;
use barcoders::sym::code128::Code128;

use crate::error::{ApiError, ApiResult};

/// Selects CODE128 character set B (printable ASCII).
const CODE_SET_B: char = '\u{0181}';

/// Turns a scan code into a printable image.
pub trait BarcodeRenderer: Send + Sync {
    /// Returns an SVG document that encodes `text`.
    fn render(&self, text: &str) -> ApiResult<String>;
}

/// CODE128 bars with the code printed underneath.
#[derive(Debug, Clone)]
pub struct Code128Renderer {
    pub bar_height: u32,
    pub module_width: u32,
    /// Blank modules left and right of the bars.
    pub quiet_zone: u32,
    pub font_size: u32,
}

impl Default for Code128Renderer {
    fn default() -> Self {
        Self { bar_height: 60, module_width: 2, quiet_zone: 10, font_size: 14 }
    }
}

impl BarcodeRenderer for Code128Renderer {
    fn render(&self, text: &str) -> ApiResult<String> {
        let encode_error = |e: barcoders::error::Error| {
            ApiError::internal(&format!("Cannot encode '{}' as CODE128: {}", text, e))
        };

        let barcode = Code128::new(format!("{}{}", CODE_SET_B, text)).map_err(encode_error)?;
        let modules = barcode.encode();

        let generator = SVG { xdim: self.module_width, ..SVG::new(self.bar_height) };
        let bars = generator.generate(&modules).map_err(encode_error)?;

        let bars_width = modules.len() as u32 * self.module_width;
        let margin = self.quiet_zone * self.module_width;
        let width = bars_width + 2 * margin;
        let height = self.bar_height + self.font_size + 8;

        Ok(format!(
            concat!(
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
                r#"<rect width="100%" height="100%" fill="white"/>"#,
                r#"<svg x="{m}" y="0" width="{bw}" height="{bh}">{bars}</svg>"#,
                r#"<text x="50%" y="{ty}" font-family="monospace" font-size="{fs}" text-anchor="middle">{t}</text>"#,
                "</svg>"
            ),
            w = width,
            h = height,
            m = margin,
            bw = bars_width,
            bh = self.bar_height,
            bars = bars,
            ty = self.bar_height + self.font_size + 2,
            fs = self.font_size,
            t = escape_xml(text),
        ))
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

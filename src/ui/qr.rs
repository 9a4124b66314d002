use anyhow::{Context, Result};
use qrcode::render::{svg, unicode};
use qrcode::QrCode;

/// Terminal QR code. Dark-on-light by default; `reversed` swaps the colors.
pub fn generate_qr(url: &str, reversed: bool) -> Result<String> {
    let code = QrCode::new(url.as_bytes()).context("Failed to generate QR code")?;

    let (dark, light) = if reversed {
        (unicode::Dense1x2::Dark, unicode::Dense1x2::Light)
    } else {
        (unicode::Dense1x2::Light, unicode::Dense1x2::Dark)
    };

    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(dark)
        .light_color(light)
        .quiet_zone(true)
        .build())
}

/// SVG document for the `/qr` page.
pub fn qr_svg(url: &str) -> Result<String> {
    let code = QrCode::new(url.as_bytes()).context("Failed to generate QR code")?;

    Ok(code
        .render::<svg::Color<'_>>()
        .min_dimensions(256, 256)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build())
}

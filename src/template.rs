//! Card-front templates.
//!
//! A card's `front_custom_json` holds a declarative layout: a list of zones
//! drawn in order. The zone set is closed; a document naming any other zone
//! type fails to parse. Rendering is a fixed interpreter over [`Zone`].
//!
//! ```json
//! {"zones": [
//!   {"type": "gradient", "from": "#1e3a8a", "to": "#9333ea", "angle": 135},
//!   {"type": "text", "content": "{title}", "region": {"x": 10, "y": 40, "width": 80, "height": 20}}
//! ]}
//! ```

use serde::{Deserialize, Serialize};

/// Placeholder in text zones replaced by the card's front title.
const TITLE_PLACEHOLDER: &str = "{title}";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("zone {index} is invalid: {reason}")]
    InvalidZone { index: usize, reason: String },
}

/// Placement in percent of the card face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for Region {
    fn default() -> Self {
        Region {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Zone {
    Image {
        url: String,
        #[serde(default)]
        alt: String,
        #[serde(default)]
        region: Region,
    },
    Text {
        content: String,
        #[serde(default)]
        align: TextAlign,
        #[serde(default)]
        region: Region,
    },
    Gradient {
        from: String,
        to: String,
        #[serde(default)]
        angle: f32,
    },
    Border {
        color: String,
        width: f32,
        #[serde(default)]
        radius: f32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrontTemplate {
    pub zones: Vec<Zone>,
}

impl FrontTemplate {
    pub fn parse(json: &str) -> Result<Self, TemplateError> {
        let template: FrontTemplate = serde_json::from_str(json)?;
        template.validate()?;
        Ok(template)
    }

    fn validate(&self) -> Result<(), TemplateError> {
        for (index, zone) in self.zones.iter().enumerate() {
            let invalid = |reason: String| TemplateError::InvalidZone { index, reason };

            match zone {
                Zone::Image { url, region, .. } => {
                    if url.trim().is_empty() {
                        return Err(invalid("image url is empty".into()));
                    }
                    check_region(region).map_err(invalid)?;
                }
                Zone::Text { region, .. } => check_region(region).map_err(invalid)?,
                Zone::Gradient { from, to, angle } => {
                    check_color(from).map_err(invalid)?;
                    check_color(to).map_err(invalid)?;
                    if !(0.0..=360.0).contains(angle) {
                        return Err(invalid(format!("angle {angle} outside 0..=360")));
                    }
                }
                Zone::Border { color, width, radius } => {
                    check_color(color).map_err(invalid)?;
                    if !width.is_finite() || *width <= 0.0 {
                        return Err(invalid(format!("border width {width} must be positive")));
                    }
                    if !radius.is_finite() || *radius < 0.0 {
                        return Err(invalid(format!("border radius {radius} is negative")));
                    }
                }
            }
        }
        Ok(())
    }

    /// Plain-text rendering of the card front, one line per zone.
    pub fn render_text(&self, title: &str) -> String {
        let mut lines = Vec::with_capacity(self.zones.len());

        for zone in &self.zones {
            let line = match zone {
                Zone::Gradient { from, to, angle } => format!("[gradient {from} -> {to} @ {angle}deg]"),
                Zone::Border { color, width, radius } => {
                    format!("[border {width}px {color} radius {radius}]")
                }
                Zone::Image { url, alt, .. } if alt.is_empty() => format!("[image {url}]"),
                Zone::Image { url, alt, .. } => format!("[image {alt}: {url}]"),
                Zone::Text { content, align, .. } => {
                    let text = content.replace(TITLE_PLACEHOLDER, title);
                    match align {
                        TextAlign::Left => text,
                        TextAlign::Center => format!("  {text}"),
                        TextAlign::Right => format!("    {text}"),
                    }
                }
            };
            lines.push(line);
        }

        lines.join("\n")
    }
}

fn check_region(region: &Region) -> Result<(), String> {
    let values = [region.x, region.y, region.width, region.height];
    if values.iter().any(|v| !v.is_finite() || !(0.0..=100.0).contains(v)) {
        return Err(format!("region {region:?} outside 0..=100"));
    }
    if region.x + region.width > 100.0 || region.y + region.height > 100.0 {
        return Err(format!("region {region:?} overflows the card"));
    }
    Ok(())
}

fn check_color(color: &str) -> Result<(), String> {
    let hex = color.strip_prefix('#').unwrap_or_default();
    let valid = matches!(hex.len(), 3 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(format!("{color:?} is not a hex color"))
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A negative key code and the layout it switches to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LayoutSwitch {
    pub code: i32,
    pub layout: String,
}

impl LayoutSwitch {
    pub fn new<T: Into<String>>(code: i32, layout: T) -> Self {
        Self {
            code,
            layout: layout.into(),
        }
    }
}

/// Pinyin-specific configuration that extends the base `Config` from core.
///
/// This configuration includes:
/// - All generic options from `hanzi_decoder_core::Config` (flattened via serde)
/// - The keyboard layout the IME decodes on
/// - Layout switch key codes and per-field-type layouts
///
/// # Example
///
/// ```rust
/// use pinyin_ime::PinyinConfig;
///
/// let config = PinyinConfig::default();
/// assert_eq!(config.layout_for_code(-2), Some("english"));
/// assert_eq!(config.layout_for_field("number"), "numeric");
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PinyinConfig {
    /// Base configuration fields (buffer cap, storage backend, caches, etc.)
    #[serde(flatten)]
    pub base: hanzi_decoder_core::Config,

    /// Layout on which keys are decoded as pinyin. Keys typed on any other
    /// layout go straight to the host.
    pub default_layout: String,

    /// Layout switch codes.
    pub layouts: Vec<LayoutSwitch>,

    /// Layout selected by `show` for an input field type.
    pub field_layouts: BTreeMap<String, String>,
}

impl Default for PinyinConfig {
    fn default() -> Self {
        let field_layouts = [
            ("number", "numeric"),
            ("tel", "numeric"),
            ("email", "english"),
            ("url", "english"),
        ]
        .into_iter()
        .map(|(field, layout)| (field.to_string(), layout.to_string()))
        .collect();

        Self {
            base: hanzi_decoder_core::Config::default(),
            default_layout: "pinyin".to_string(),
            layouts: vec![
                LayoutSwitch::new(-1, "symbols"),
                LayoutSwitch::new(-2, "english"),
                LayoutSwitch::new(-3, "pinyin"),
            ],
            field_layouts,
        }
    }
}

impl PinyinConfig {
    /// Convert this pinyin config into the base config.
    pub fn into_base(self) -> hanzi_decoder_core::Config {
        self.base
    }

    /// Get a reference to the base config
    pub fn base(&self) -> &hanzi_decoder_core::Config {
        &self.base
    }

    /// Get a mutable reference to the base config
    pub fn base_mut(&mut self) -> &mut hanzi_decoder_core::Config {
        &mut self.base
    }

    /// Layout switched to by a negative key code.
    pub fn layout_for_code(&self, code: i32) -> Option<&str> {
        self.layouts
            .iter()
            .find(|s| s.code == code)
            .map(|s| s.layout.as_str())
    }

    /// Layout for an input field type, falling back to the default layout.
    pub fn layout_for_field(&self, field_type: &str) -> &str {
        self.field_layouts
            .get(field_type)
            .map(String::as_str)
            .unwrap_or(&self.default_layout)
    }

    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize configuration to TOML string.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattened_base_fields_parse() {
        let cfg = PinyinConfig::from_toml_str(
            r#"
max_buffer_length = 12
default_layout = "pinyin"

[[layouts]]
code = -5
layout = "emoji"

[field_layouts]
search = "english"
"#,
        )
        .unwrap();
        assert_eq!(cfg.base.max_buffer_length, 12);
        assert_eq!(cfg.base.max_term_length, 8);
        assert_eq!(cfg.layout_for_code(-5), Some("emoji"));
        assert_eq!(cfg.layout_for_code(-1), None);
        assert_eq!(cfg.layout_for_field("search"), "english");
        assert_eq!(cfg.layout_for_field("text"), "pinyin");
    }

    #[test]
    fn defaults_roundtrip_through_toml() {
        let cfg = PinyinConfig::default();
        let text = cfg.to_toml_string().unwrap();
        assert_eq!(PinyinConfig::from_toml_str(&text).unwrap(), cfg);
    }
}

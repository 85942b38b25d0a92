use serde::{Deserialize, Serialize};

/// Fallback swatch for layers whose drawing declares no color.
pub const DEFAULT_LAYER_COLOR: &str = "#9ca3af";

/// One drawing layer discovered in the packaged container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub name: String,
    pub color: String,
}

impl LayerDescriptor {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
        }
    }
}

/// Wire shape of one layer-list element.
///
/// Older clients produced and consumed bare name strings; current ones use
/// `{name, color}` objects. Both shapes deserialize; normalization to
/// [`LayerDescriptor`] happens exactly once at this boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LayerEntry {
    Name(String),
    Descriptor { name: String, color: Option<String> },
}

impl LayerEntry {
    pub fn normalize(self) -> LayerDescriptor {
        match self {
            LayerEntry::Name(name) => LayerDescriptor::new(name, DEFAULT_LAYER_COLOR),
            LayerEntry::Descriptor { name, color } => LayerDescriptor::new(
                name,
                color.unwrap_or_else(|| DEFAULT_LAYER_COLOR.to_string()),
            ),
        }
    }
}

/// Normalizes a mixed-shape layer list into descriptors.
pub fn normalize_layers(entries: Vec<LayerEntry>) -> Vec<LayerDescriptor> {
    entries.into_iter().map(LayerEntry::normalize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_string_normalizes_with_default_color() {
        let entries: Vec<LayerEntry> = serde_json::from_str(r#"["WALLS", "DOORS"]"#).unwrap();
        let layers = normalize_layers(entries);
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0], LayerDescriptor::new("WALLS", DEFAULT_LAYER_COLOR));
    }

    #[test]
    fn test_object_shape_keeps_color() {
        let entries: Vec<LayerEntry> =
            serde_json::from_str(r##"[{"name":"WALLS","color":"#FF0000"}]"##).unwrap();
        let layers = normalize_layers(entries);
        assert_eq!(layers[0], LayerDescriptor::new("WALLS", "#FF0000"));
    }

    #[test]
    fn test_object_without_color_gets_default() {
        let entries: Vec<LayerEntry> = serde_json::from_str(r#"[{"name":"WALLS"}]"#).unwrap();
        let layers = normalize_layers(entries);
        assert_eq!(layers[0].color, DEFAULT_LAYER_COLOR);
    }

    #[test]
    fn test_mixed_shapes_normalize() {
        let entries: Vec<LayerEntry> =
            serde_json::from_str(r##"["AXES", {"name":"WALLS","color":"#00FF00"}]"##).unwrap();
        let layers = normalize_layers(entries);
        assert_eq!(layers[0].name, "AXES");
        assert_eq!(layers[1].color, "#00FF00");
    }
}

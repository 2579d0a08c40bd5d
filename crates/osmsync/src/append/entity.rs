use crate::error::{SyncError, SyncResult};
use crate::tools::zoom_range;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path};

pub const MIN_ZOOM_LEVEL: u8 = 0;
pub const MAX_ZOOM_LEVEL: u8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoomLevel {
    pub min: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u8>,
}

impl ZoomLevel {
    /// `--expire-tiles` value for osm2pgsql
    pub fn range(&self) -> String {
        zoom_range(self.min, self.max)
    }
}

/// One osm2pgsql target of a project, applied on every cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppendEntity {
    pub id: String,
    /// Script key relative to the project prefix
    pub script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoom_level: Option<ZoomLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_key: Option<String>,
}

impl AppendEntity {
    pub fn script_key(&self, project_id: &str) -> String {
        format!("{}/{}", project_id, self.script)
    }
}

pub fn parse_entities(content: &str) -> SyncResult<Vec<AppendEntity>> {
    let entities: Vec<AppendEntity> = serde_json::from_str(content)
        .map_err(|err| SyncError::config(format!("invalid append configuration: {}", err)))?;
    validate_entities(&entities)?;
    Ok(entities)
}

/// Read and validate an append configuration file
pub async fn load_entities(path: &Path) -> SyncResult<Vec<AppendEntity>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|err| {
        SyncError::config(format!(
            "failed to read append configuration '{}': {}",
            path.display(),
            err
        ))
    })?;
    parse_entities(&content)
}

pub fn validate_entities(entities: &[AppendEntity]) -> SyncResult<()> {
    if entities.is_empty() {
        return Err(SyncError::config("append configuration must contain at least one entity"));
    }

    let mut ids = HashSet::new();
    for entity in entities {
        if entity.id.is_empty() {
            return Err(SyncError::config("entity id cannot be empty"));
        }
        if !ids.insert(entity.id.as_str()) {
            return Err(SyncError::config(format!("duplicate entity id '{}'", entity.id)));
        }
        if entity.id.contains(['/', '\\']) || entity.id == ".." {
            return Err(SyncError::config(format!(
                "entity id '{}' cannot contain path separators",
                entity.id
            )));
        }
        if entity.script.is_empty() {
            return Err(SyncError::config(format!("entity '{}' has no script", entity.id)));
        }
        if !is_nested_key(&entity.script) {
            return Err(SyncError::config(format!(
                "entity '{}' script '{}' must be a relative key without '..'",
                entity.id, entity.script
            )));
        }

        if let Some(zoom) = entity.zoom_level {
            let max = zoom.max.unwrap_or(zoom.min);
            if zoom.min > MAX_ZOOM_LEVEL || max > MAX_ZOOM_LEVEL {
                return Err(SyncError::config(format!(
                    "entity '{}' zoom levels must be between {} and {}",
                    entity.id, MIN_ZOOM_LEVEL, MAX_ZOOM_LEVEL
                )));
            }
            if zoom.min > max {
                return Err(SyncError::config(format!(
                    "entity '{}' min zoom {} is greater than max zoom {}",
                    entity.id, zoom.min, max
                )));
            }
        }
    }

    Ok(())
}

/// Keys are joined onto the work directory, so they must stay below it
fn is_nested_key(key: &str) -> bool {
    Path::new(key)
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entities() {
        let entities = parse_entities(
            r#"[
                {"id": "roads", "script": "roads.lua", "zoomLevel": {"min": 12, "max": 18}, "geometryKey": "geo/israel.json"},
                {"id": "buildings", "script": "buildings.lua"}
            ]"#,
        )
        .unwrap();

        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].zoom_level.unwrap().range(), "12-18");
        assert_eq!(entities[0].script_key("proj"), "proj/roads.lua");
        assert_eq!(entities[1].geometry_key, None);
    }

    #[test]
    fn test_rejects_unknown_fields_and_empty_list() {
        assert!(parse_entities(r#"[{"id": "a", "script": "a.lua", "style": "x"}]"#).is_err());
        assert!(parse_entities("[]").is_err());
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = parse_entities(r#"[{"id": "a", "script": "a.lua"}, {"id": "a", "script": "b.lua"}]"#)
            .unwrap_err();
        assert!(err.to_string().contains("duplicate entity id 'a'"));
    }

    #[test]
    fn test_zoom_bounds() {
        assert!(parse_entities(r#"[{"id": "a", "script": "a.lua", "zoomLevel": {"min": 21}}]"#).is_err());
        assert!(parse_entities(r#"[{"id": "a", "script": "a.lua", "zoomLevel": {"min": 10, "max": 5}}]"#).is_err());
        assert!(parse_entities(r#"[{"id": "a", "script": "a.lua", "zoomLevel": {"min": -1}}]"#).is_err());

        let entities = parse_entities(r#"[{"id": "a", "script": "a.lua", "zoomLevel": {"min": 15}}]"#).unwrap();
        assert_eq!(entities[0].zoom_level.unwrap().range(), "15");
    }

    #[test]
    fn test_script_must_stay_inside_work_dir() {
        for script in ["/etc/passwd", "../outside.lua", "styles/../../outside.lua"] {
            let config = serde_json::json!([{"id": "a", "script": script}]).to_string();
            let err = parse_entities(&config).unwrap_err();
            assert!(matches!(err, SyncError::Config(_)), "{} should be rejected", script);
        }

        let entities = parse_entities(r#"[{"id": "a", "script": "styles/roads.lua"}]"#).unwrap();
        assert_eq!(entities[0].script_key("proj"), "proj/styles/roads.lua");
    }

    #[test]
    fn test_entity_id_is_a_single_segment() {
        assert!(parse_entities(r#"[{"id": "../a", "script": "a.lua"}]"#).is_err());
        assert!(parse_entities(r#"[{"id": "..", "script": "a.lua"}]"#).is_err());
        assert!(parse_entities(r#"[{"id": "roads-v2", "script": "a.lua"}]"#).is_ok());
    }
}

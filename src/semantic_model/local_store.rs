use crate::semantic_model::{Schema, SchemaError, SchemaStore};
use log::{debug, info};
use std::fs;
use std::path::Path;

/// [`SchemaStore`] backed by a JSON file on the local filesystem
#[derive(Clone, Debug)]
pub struct LocalSchemaStore {
    schema: Schema,
}

impl LocalSchemaStore {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| SchemaError::FileNotFound(format!("{}: {}", path.display(), e)))?;
        let store = Self::from_json(&content)?;
        info!(
            "Loaded schema '{}' with {} cubes from {}",
            store.schema.name,
            store.schema.cubes.len(),
            path.display()
        );
        Ok(store)
    }

    pub fn from_json(content: &str) -> Result<Self, SchemaError> {
        let schema: Schema =
            serde_json::from_str(content).map_err(|e| SchemaError::InvalidJson(e.to_string()))?;
        for cube in &schema.cubes {
            debug!(
                "Cube {}: {} hierarchies, {} measures",
                cube.name,
                cube.hierarchies.len(),
                cube.measures.len()
            );
        }
        Ok(LocalSchemaStore { schema })
    }
}

impl SchemaStore for LocalSchemaStore {
    fn get_schema(&self) -> &Schema {
        &self.schema
    }
}

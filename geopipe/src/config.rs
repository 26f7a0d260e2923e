use crate::GeneratorError;
use geopipe_osm::cache::NodeStorageType;
use geopipe_osm::source::OsmSourceType;
use std::path::{Path, PathBuf};

/// Resolved paths and knobs shared by every stage of one generator run.
pub struct GenerateInfo {
    pub osm_file_name: String,
    pub osm_file_type: OsmSourceType,
    pub node_storage: NodeStorageType,
    pub data_path: PathBuf,
    pub intermediate_data_path: PathBuf,
    pub output: String,
    pub threads_count: usize,
    pub verbose: bool,
}

impl GenerateInfo {
    pub fn new(
        osm_file_name: String,
        osm_file_type: &str,
        node_storage: &str,
        data_path: &str,
        intermediate_data_path: &str,
        output: String,
        verbose: bool,
    ) -> Result<GenerateInfo, GeneratorError> {
        if data_path.is_empty() {
            return Err(GeneratorError::Configuration("set data path".into()));
        }

        // The writable dir may be pinned from the environment, like every
        // other deployment of these tools does it.
        let data_path = std::env::var("MWM_WRITABLE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(data_path));

        let intermediate_data_path = if intermediate_data_path.is_empty() {
            data_path.join("tmp")
        } else {
            PathBuf::from(intermediate_data_path)
        };

        Ok(GenerateInfo {
            osm_file_name,
            osm_file_type: osm_file_type.parse()?,
            node_storage: node_storage.parse()?,
            data_path,
            intermediate_data_path,
            output,
            threads_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            verbose,
        })
    }

    pub fn intermediate_dir(&self) -> &Path {
        &self.intermediate_data_path
    }

    pub fn tmp_feature_file(&self, bucket: &str) -> PathBuf {
        self.intermediate_data_path
            .join(format!("{}.{bucket}.tmp", self.output))
    }

    pub fn out_file(&self, suffix: &str) -> PathBuf {
        self.data_path.join(format!("{}{suffix}", self.output))
    }

    /// A fresh path in the system temp dir (`TMPDIR` honored).
    pub fn tmp_path_for_file() -> PathBuf {
        let unique = format!(
            "geopipe-{}-{:x}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default()
        );
        std::env::temp_dir().join(unique)
    }
}

use crate::checks::Plugin;
use crate::config::Args;
use async_trait::async_trait;
use log::debug;
use tokio::fs;
use url::Url;

/// Passes when every watched file exists and is not empty.
///
/// Watched files are the path of a `file://` check URL, the `files` list given when the
/// plugin was loaded, and the `files` list of the individual check.
pub struct FileCheck {
    name: &'static str,
    files: Vec<String>,
}

impl FileCheck {
    pub fn new(args: &Args) -> Self {
        Self {
            name: "FileCheck",
            files: files_from(args),
        }
    }
}

fn files_from(args: &Args) -> Vec<String> {
    args.get("files")
        .and_then(serde_json::Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(serde_json::Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().to_string())
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Plugin for FileCheck {
    fn name(&self) -> &str {
        self.name
    }

    async fn check(&self, url: &str, args: &Args) -> Result<(), String> {
        debug!("Running file checks for {}", url);

        let mut files = Vec::new();
        if let Ok(url) = Url::parse(url) {
            if url.scheme() == "file" {
                let path = url
                    .to_file_path()
                    .map_err(|_| format!("{} is not a local file path", url))?;
                files.push(path.to_string_lossy().into_owned());
            }
        }
        files.extend(self.files.iter().cloned());
        files.extend(files_from(args));

        if files.is_empty() {
            return Err("no files to check".to_string());
        }

        for file in &files {
            let metadata = fs::metadata(file)
                .await
                .map_err(|e| format!("Failed to access {}: {}", file, e))?;
            if metadata.len() == 0 {
                return Err(format!("File {} is empty", file));
            }
        }
        Ok(())
    }
}

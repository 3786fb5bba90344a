// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::{
    borrow::Cow,
    collections::{hash_map::Entry, HashMap},
    fmt, fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use thiserror::Error;
use wgpu::{Device, ErrorFilter, ShaderModule, ShaderModuleDescriptor, ShaderSource};

/// Token every kernel template carries exactly once in its
/// `@workgroup_size(...)` attribute.
pub const WORKGROUP_SIZE_TOKEN: &str = "{{WORKGROUP_SIZE}}";

/// Errors that may occur when loading WGSL templates into a WGPU pipeline.
#[derive(Debug, Error)]
pub enum ShaderLoadError {
    /// The WGSL source file could not be read from disk.
    #[error("failed to read WGSL shader '{path}'")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    /// The template has no workgroup-size token to substitute.
    #[error("workgroup size token not found in '{file}'")]
    TokenMissing { file: PathBuf },
    /// The template carries the token more than once.
    #[error("workgroup size token appears {count} times in '{file}', expected once")]
    TokenRepeated { file: PathBuf, count: usize },
    /// WGSL failed to compile or validate when creating a shader module.
    #[error("failed to compile WGSL shader '{label}' ({context})")]
    Compile {
        label: String,
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Debug)]
struct ShaderCompileError(String);

impl fmt::Display for ShaderCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ShaderCompileError {}

/// Directory holding the templates shipped with this crate.
pub fn default_shader_dir() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/dft"))
}

/// Resolve the workgroup-size token to `"x, y, z"`.
///
/// Absent and repeated tokens are both configuration errors: the kernel would
/// otherwise be compiled with a size the dispatch geometry knows nothing
/// about.
pub fn apply_workgroup_size(
    source: &str,
    file: &str,
    size: [u32; 3],
) -> Result<String, ShaderLoadError> {
    match source.matches(WORKGROUP_SIZE_TOKEN).count() {
        0 => Err(ShaderLoadError::TokenMissing {
            file: PathBuf::from(file),
        }),
        1 => {
            let resolved = format!("{}, {}, {}", size[0], size[1], size[2]);
            Ok(source.replacen(WORKGROUP_SIZE_TOKEN, &resolved, 1))
        }
        count => Err(ShaderLoadError::TokenRepeated {
            file: PathBuf::from(file),
            count,
        }),
    }
}

/// Error scopes form one stack per device, shared by every thread that uses
/// it. Scoped sections hold this lock so concurrent invocations cannot pop
/// each other's errors.
static SCOPE_LOCK: Mutex<()> = Mutex::new(());

/// Run `f` inside a validation error scope and return whatever the device
/// reported for it.
///
/// Scoped sections are serialised process-wide and must not nest.
pub fn with_validation_scope<T>(
    device: &Device,
    f: impl FnOnce() -> T,
) -> (T, Option<wgpu::Error>) {
    let _guard = SCOPE_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    device.push_error_scope(ErrorFilter::Validation);
    let value = f();
    let error = pollster::block_on(device.pop_error_scope());
    (value, error)
}

/// Compile `source` into a shader module, surfacing WGSL errors instead of
/// handing them to the device's uncaptured error handler.
pub fn create_module(
    device: &Device,
    label: &str,
    source: String,
    context: &str,
) -> Result<ShaderModule, ShaderLoadError> {
    let (module, error) = with_validation_scope(device, || {
        device.create_shader_module(ShaderModuleDescriptor {
            label: Some(label),
            source: ShaderSource::Wgsl(Cow::Owned(source)),
        })
    });
    match error {
        None => Ok(module),
        Some(err) => Err(ShaderLoadError::Compile {
            label: label.to_string(),
            context: context.to_string(),
            source: Box::new(ShaderCompileError(err.to_string())),
        }),
    }
}

/// Cache for WGSL template sources stored on disk.
///
/// Only the text is cached. Modules and pipelines are built per invocation
/// and released with it.
#[derive(Default)]
pub struct ShaderCache {
    shader_dir: PathBuf,
    sources: HashMap<PathBuf, String>,
}

impl ShaderCache {
    /// Create a cache rooted at `shader_dir`.
    pub fn new(shader_dir: impl Into<PathBuf>) -> Self {
        Self {
            shader_dir: shader_dir.into(),
            sources: HashMap::new(),
        }
    }

    pub fn shader_dir(&self) -> &Path {
        &self.shader_dir
    }

    /// Drop all cached shader sources.
    pub fn clear(&mut self) {
        self.sources.clear();
    }

    /// Retrieve the WGSL source for `file`, reading it from disk if necessary.
    pub fn source(&mut self, file: &str) -> Result<&str, ShaderLoadError> {
        let path = self.shader_dir.join(file);
        match self.sources.entry(path.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut().as_str()),
            Entry::Vacant(entry) => {
                let source = fs::read_to_string(&path).map_err(|source| ShaderLoadError::Io {
                    source,
                    path: path.clone(),
                })?;
                Ok(entry.insert(source).as_str())
            }
        }
    }

    /// Template `file` with its workgroup size resolved.
    pub fn specialised(&mut self, file: &str, size: [u32; 3]) -> Result<String, ShaderLoadError> {
        apply_workgroup_size(self.source(file)?, file, size)
    }

    /// Ensure that all `files` are loaded into the cache.
    pub fn prefetch<I, S>(&mut self, files: I) -> Result<(), ShaderLoadError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for file in files {
            self.source(file.as_ref())?;
        }
        Ok(())
    }
}

impl fmt::Debug for ShaderCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderCache")
            .field("shader_dir", &self.shader_dir)
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_reuses_source_without_retouching_disk() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("example.wgsl"), "// first pass\n").unwrap();

        let mut cache = ShaderCache::new(temp.path());
        assert_eq!(cache.source("example.wgsl").unwrap(), "// first pass\n");

        fs::write(temp.path().join("example.wgsl"), "// second pass\n").unwrap();
        assert_eq!(cache.source("example.wgsl").unwrap(), "// first pass\n");

        cache.clear();
        assert_eq!(cache.source("example.wgsl").unwrap(), "// second pass\n");
    }

    #[test]
    fn prefetch_reports_missing_files() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.wgsl"), "// A\n").unwrap();

        let mut cache = ShaderCache::new(temp.path());
        let err = cache.prefetch(["a.wgsl", "b.wgsl"]).unwrap_err();
        match err {
            ShaderLoadError::Io { path, .. } => assert_eq!(path, temp.path().join("b.wgsl")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(cache.source("a.wgsl").unwrap(), "// A\n");
    }

    #[test]
    fn workgroup_token_is_resolved_once() {
        let source = "@compute @workgroup_size({{WORKGROUP_SIZE}})\nfn main() {}\n";
        let resolved = apply_workgroup_size(source, "row.wgsl", [16, 8, 1]).unwrap();
        assert!(resolved.contains("@workgroup_size(16, 8, 1)"));
        assert!(!resolved.contains(WORKGROUP_SIZE_TOKEN));
    }

    #[test]
    fn missing_token_is_fatal() {
        let err = apply_workgroup_size("@workgroup_size(64)", "row.wgsl", [8, 8, 1]).unwrap_err();
        match err {
            ShaderLoadError::TokenMissing { file } => assert_eq!(file, PathBuf::from("row.wgsl")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn repeated_token_is_fatal() {
        let source = "{{WORKGROUP_SIZE}} {{WORKGROUP_SIZE}}";
        let err = apply_workgroup_size(source, "col.wgsl", [8, 8, 1]).unwrap_err();
        assert!(matches!(err, ShaderLoadError::TokenRepeated { count: 2, .. }));
    }

    #[test]
    fn bundled_templates_are_found() {
        let mut cache = ShaderCache::new(default_shader_dir());
        cache
            .prefetch(["row.wgsl", "col.wgsl", "row_forward.wgsl", "col_forward.wgsl"])
            .unwrap();
        let row = cache.specialised("row.wgsl", [4, 4, 1]).unwrap();
        assert!(row.contains("@workgroup_size(4, 4, 1)"));
    }
}

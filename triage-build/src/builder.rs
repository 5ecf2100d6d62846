use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::{copy_dir, Step};
use crate::variant::Variant;

/// Everything that determines the content of one variant build.
///
/// A build is reused when its stored configuration equals the requested one, so the patch and
/// allow-list are compared by content rather than by path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub variant: Variant,
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_list: Option<String>,
}

/// Builds the original and the patched variant of a harness from one source tree.
#[derive(Debug, Clone)]
pub struct VariantBuild {
    sources: PathBuf,
    patch: PathBuf,
    allow_list: Option<PathBuf>,
    command: Vec<String>,
}

impl VariantBuild {
    pub fn new(
        sources: impl Into<PathBuf>,
        patch: impl Into<PathBuf>,
        command: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            sources: sources.into(),
            patch: patch.into(),
            allow_list: None,
            command: command.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_allow_list(mut self, allow_list: impl Into<PathBuf>) -> Self {
        self.allow_list = Some(allow_list.into());
        self
    }

    pub fn sources(&self) -> &Path {
        self.sources.as_path()
    }

    pub fn config_for(&self, variant: Variant) -> Result<BuildConfig> {
        let (patch, allow_list) = match variant {
            Variant::Original => (None, None),
            Variant::Patched => (
                Some(read_input(&self.patch)?),
                self.allow_list.as_deref().map(read_input).transpose()?,
            ),
        };

        Ok(BuildConfig {
            variant,
            command: self.command.clone(),
            patch,
            allow_list,
        })
    }

    /// Builds both variants into `out_dir` and returns the directory layout.
    pub fn build_all(&self, out_dir: impl AsRef<Path>) -> Result<VariantDir> {
        if !self.sources.is_dir() {
            return Err(Error::InputMissing {
                path: self.sources.clone(),
            });
        }

        let variant_dir = VariantDir::new(out_dir.as_ref());
        for variant in Variant::ALL {
            variant_dir.make(self, variant)?;
        }

        Ok(variant_dir)
    }
}

fn read_input(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|_| Error::InputMissing {
        path: path.to_path_buf(),
    })
}

/// On-disk layout of the variant builds: `<root>/<variant>/{src,out}`.
#[derive(Debug, Clone)]
pub struct VariantDir {
    root: PathBuf,
}

impl VariantDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        self.root.as_path()
    }

    pub fn path_for(&self, variant: Variant) -> PathBuf {
        self.root.join(variant.name())
    }

    pub fn sources(&self, variant: Variant) -> PathBuf {
        self.path_for(variant).join("src")
    }

    pub fn out(&self, variant: Variant) -> PathBuf {
        self.path_for(variant).join("out")
    }

    pub fn binary(&self, variant: Variant, harness: impl AsRef<Path>) -> PathBuf {
        self.out(variant).join(harness)
    }

    pub fn contains(&self, config: &BuildConfig) -> bool {
        self.out(config.variant).is_dir()
            && self.load_config(config.variant).as_ref() == Some(config)
    }

    pub fn remove(&self, variant: Variant) -> Result<()> {
        let path = self.path_for(variant);
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::VariantDirUnavailable {
                dir: path,
                reason: e,
            }),
        }
    }

    pub fn make(&self, build: &VariantBuild, variant: Variant) -> Result<PathBuf> {
        let config = build.config_for(variant)?;
        let out = self.out(variant);

        if self.contains(&config) {
            log::info!("reusing {variant} build at {}", out.display());
            return Ok(out);
        }

        // NOTE never build on top of a stale tree from a previous configuration
        self.remove(variant)?;

        let sources = self.sources(variant);
        copy_dir(build.sources(), &sources).map_err(|e| Error::SourcesCopyFailed {
            from: build.sources().to_path_buf(),
            to: sources.clone(),
            reason: e,
        })?;

        fs::create_dir_all(&out).map_err(|e| Error::VariantDirUnavailable {
            dir: out.clone(),
            reason: e,
        })?;

        if variant.is_patched() {
            let patch = fs::canonicalize(&build.patch).map_err(|_| Error::InputMissing {
                path: build.patch.clone(),
            })?;

            Step::new("patch", "patch", &sources)
                .args(["-p1", "-i"])
                .arg(&patch)
                .run()
                .map_err(|e| Error::PatchFailed {
                    patch,
                    sources: sources.clone(),
                    reason: e,
                })?;
        }

        let Some((program, args)) = config.command.split_first() else {
            return Err(Error::BuildFailed {
                variant,
                step: String::from("build"),
                reason: io::Error::new(io::ErrorKind::InvalidInput, "empty build command"),
            });
        };

        let mut step = Step::new(format!("build-{variant}"), program, &sources);
        step.args(args)
            .env("SRC", &sources)
            .env("OUT", &out)
            .env("VARIANT", variant.name());

        if variant.is_patched() {
            if let Some(allow_list) = build.allow_list.as_deref() {
                let allow_list = fs::canonicalize(allow_list).map_err(|_| Error::InputMissing {
                    path: allow_list.to_path_buf(),
                })?;
                step.env("ALLOW_LIST", allow_list);
            }
        }

        step.run().map_err(|e| Error::BuildFailed {
            variant,
            step: step.name.clone(),
            reason: e,
        })?;

        let serialized = serde_json::to_string_pretty(&config)
            .map_err(|e| Error::ConfigSerializationFailed { reason: e })?;
        fs::write(self.config_file(variant), serialized).map_err(|e| {
            Error::VariantDirUnavailable {
                dir: self.path_for(variant),
                reason: e,
            }
        })?;

        Ok(out)
    }

    fn load_config(&self, variant: Variant) -> Option<BuildConfig> {
        fs::read_to_string(self.config_file(variant))
            .ok()
            .and_then(|content| serde_json::from_str::<BuildConfig>(&content).ok())
    }

    fn config_file(&self, variant: Variant) -> PathBuf {
        self.path_for(variant).join(".variant_config")
    }
}

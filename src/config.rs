// config.rs — 启动配置：默认值 -> panorama.json -> 命令行

use crate::error::ViewerError;
use crate::mesh::DEFAULT_GRID_RESOLUTION;
use crate::texture::DEFAULT_IMAGE;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "panorama.json";

/// 6·N² 个 8 字节顶点必须放进 wgpu 默认的 256 MiB 缓冲上限
pub const MAX_GRID_RESOLUTION: u32 = 2048;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewerConfig {
    /// File path or http(s) URL of the equirectangular image.
    pub image: String,
    pub grid_resolution: u32,
    pub window_width: u32,
    pub window_height: u32,
    pub vsync: bool,
    pub status_bar: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            grid_resolution: DEFAULT_GRID_RESOLUTION,
            window_width: 1280,
            window_height: 720,
            vsync: true,
            status_bar: true,
        }
    }
}

/// Find panorama.json by searching:
/// 1) <exe_dir>/panorama.json
/// 2) ./panorama.json
fn find_config_file() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let p = dir.join(CONFIG_FILE);
            if p.exists() {
                return Some(p);
            }
        }
    }

    let p = PathBuf::from(CONFIG_FILE);
    if p.exists() {
        return Some(p);
    }

    None
}

impl ViewerConfig {
    pub fn from_json(text: &str) -> Result<Self, ViewerError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ViewerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ViewerError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ViewerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text).map_err(|e| match e {
            ViewerError::Config(msg) => ViewerError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Defaults, then the config file, then command-line overrides.
    pub fn resolve() -> Result<Self, ViewerError> {
        let args: Vec<String> = std::env::args().skip(1).collect();

        let explicit = args
            .iter()
            .position(|a| a == "--config")
            .map(|i| {
                args.get(i + 1)
                    .map(PathBuf::from)
                    .ok_or_else(|| ViewerError::Config("--config needs a path".into()))
            })
            .transpose()?;

        let mut config = match explicit.or_else(find_config_file) {
            Some(path) => {
                log::info!("reading configuration from {}", path.display());
                Self::load(&path)?
            }
            None => Self::default(),
        };

        config.apply_args(args)?;
        Ok(config)
    }

    /// `--image <src>`, `--grid <n>`, `--no-vsync`, `--no-status-bar`, or a bare image path.
    pub fn apply_args<I>(&mut self, args: I) -> Result<(), ViewerError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut it = args.into_iter();
        while let Some(a) = it.next() {
            match a.as_str() {
                "--image" => self.image = value(&mut it, "--image")?,
                "--grid" => {
                    let v = value(&mut it, "--grid")?;
                    self.grid_resolution = v
                        .parse()
                        .map_err(|_| ViewerError::Config(format!("--grid: not a number: {}", v)))?;
                }
                "--config" => {
                    // 已在 resolve() 中处理
                    value(&mut it, "--config")?;
                }
                "--no-vsync" => self.vsync = false,
                "--no-status-bar" => self.status_bar = false,
                opt if opt.starts_with("--") => {
                    return Err(ViewerError::Config(format!("unknown option {}", opt)));
                }
                _ => self.image = a.clone(),
            }
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), ViewerError> {
        if self.grid_resolution == 0 || self.grid_resolution > MAX_GRID_RESOLUTION {
            return Err(ViewerError::Config(format!(
                "grid_resolution must be in 1..={}, got {}",
                MAX_GRID_RESOLUTION, self.grid_resolution
            )));
        }
        if self.window_width == 0 || self.window_height == 0 {
            return Err(ViewerError::Config("window size must be non-zero".into()));
        }
        if self.image.trim().is_empty() {
            return Err(ViewerError::Config("image source is empty".into()));
        }
        Ok(())
    }
}

fn value(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, ViewerError> {
    it.next()
        .ok_or_else(|| ViewerError::Config(format!("{} needs a value", flag)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_match_the_classic_viewer() {
        let c = ViewerConfig::default();
        assert_eq!(c.image, "pano.jpg");
        assert_eq!(c.grid_resolution, 1000);
        assert!(c.vsync);
    }

    #[test]
    fn json_fields_are_optional() {
        let c = ViewerConfig::from_json(r#"{ "image": "lobby.png", "grid_resolution": 64 }"#).unwrap();
        assert_eq!(c.image, "lobby.png");
        assert_eq!(c.grid_resolution, 64);
        assert_eq!(c.window_width, 1280);
    }

    #[test]
    fn unknown_json_field_is_rejected() {
        let err = ViewerConfig::from_json(r#"{ "fov": 60 }"#).unwrap_err();
        assert!(matches!(err, ViewerError::Config(_)));
    }

    #[test]
    fn command_line_overrides_file() {
        let mut c = ViewerConfig::from_json(r#"{ "image": "a.jpg" }"#).unwrap();
        c.apply_args(args(&["--grid", "8", "--no-vsync", "b.jpg"])).unwrap();
        assert_eq!(c.image, "b.jpg");
        assert_eq!(c.grid_resolution, 8);
        assert!(!c.vsync);
        assert!(c.status_bar);
    }

    #[test]
    fn bad_arguments_are_config_errors() {
        let cases: [&[&str]; 5] = [
            &["--grid"],
            &["--grid", "lots"],
            &["--grid", "0"],
            &["--grid", "4096"],
            &["--fullscreen"],
        ];
        for bad in cases {
            let mut c = ViewerConfig::default();
            assert!(
                matches!(c.apply_args(args(bad)), Err(ViewerError::Config(_))),
                "{:?}",
                bad
            );
        }
    }

    #[test]
    fn load_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        let err = ViewerConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains(CONFIG_FILE));
    }
}

use crate::compositor::CompositeError;
use std::path::Path;
use std::process::Command;

/// How the desktop should lay out the applied image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrangement {
    /// Repeat from the top-left corner of the virtual desktop
    Tile,
    /// Stretch across all screens
    Span,
}

impl Arrangement {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tile => "tile",
            Self::Span => "span",
        }
    }
}

/// Sets an image file as the desktop wallpaper.
pub trait DesktopApplier: Send + Sync {
    fn apply(&self, image_path: &Path, arrangement: Arrangement) -> Result<(), CompositeError>;
}

/// Leaves the written image alone; used for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopApplier;

impl DesktopApplier for NoopApplier {
    fn apply(&self, image_path: &Path, _arrangement: Arrangement) -> Result<(), CompositeError> {
        log::info!("Dry run, wallpaper written to {}", image_path.display());
        Ok(())
    }
}

/// Runs a configured command such as `feh --bg-tile {}`.
///
/// `{}` is replaced by the image path and `{mode}` by the arrangement name.
/// The template is split on whitespace, so the path is always passed as a
/// single argument.
#[derive(Debug, Clone)]
pub struct CommandApplier {
    program: String,
    args: Vec<String>,
}

impl CommandApplier {
    pub fn new(template: &str) -> Result<Self, CompositeError> {
        let mut parts = template.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| CompositeError::Apply("empty apply command".to_string()))?;

        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    fn build_args(&self, image_path: &Path, arrangement: Arrangement) -> Vec<String> {
        let path = image_path.to_string_lossy();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace("{mode}", arrangement.name()).replace("{}", &path))
            .collect();

        if !self.args.iter().any(|arg| arg.contains("{}")) {
            args.push(path.to_string());
        }
        args
    }
}

impl DesktopApplier for CommandApplier {
    fn apply(&self, image_path: &Path, arrangement: Arrangement) -> Result<(), CompositeError> {
        let args = self.build_args(image_path, arrangement);
        log::debug!("Running {} {}", self.program, args.join(" "));

        let output = Command::new(&self.program).args(&args).output()?;
        if !output.status.success() {
            return Err(CompositeError::Apply(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }
}

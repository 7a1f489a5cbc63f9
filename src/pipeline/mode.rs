use std::fmt;
use std::str::FromStr;

/// What the pipeline does to each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    #[default]
    Off,
    Blur,
    VirtualBackground,
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "blur" => Ok(Self::Blur),
            "virtual" | "virtual-background" | "virtual_background" => Ok(Self::VirtualBackground),
            other => Err(format!(
                "unknown mode '{other}' (expected off, blur or virtual-background)"
            )),
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::Blur => "blur",
            Self::VirtualBackground => "virtual-background",
        })
    }
}

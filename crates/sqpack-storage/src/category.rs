//! Data categories and container file naming.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqpack_formats::MAX_CONTAINER_NUMBER;

use crate::{PLATFORM, StorageError};

/// Asset category; each category has its own set of container files
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    /// Shared data
    Common,
    /// Shared background assets
    Bgcommon,
    /// Background assets
    Bg,
    /// Cutscenes
    Cut,
    /// Characters
    Chara,
    /// Shaders
    Shader,
    /// User interface
    Ui,
    /// Sound effects
    Sound,
    /// Visual effects
    Vfx,
    /// Excel data sheets
    Exd,
    /// Game scripts
    GameScript,
    /// Music
    Music,
}

impl DataCategory {
    /// Every category, in key order.
    pub const ALL: [Self; 12] = [
        Self::Common,
        Self::Bgcommon,
        Self::Bg,
        Self::Cut,
        Self::Chara,
        Self::Shader,
        Self::Ui,
        Self::Sound,
        Self::Vfx,
        Self::Exd,
        Self::GameScript,
        Self::Music,
    ];

    /// Six-digit key used in file names (`040000` for chara).
    pub const fn key(self) -> &'static str {
        match self {
            Self::Common => "000000",
            Self::Bgcommon => "010000",
            Self::Bg => "020000",
            Self::Cut => "030000",
            Self::Chara => "040000",
            Self::Shader => "050000",
            Self::Ui => "060000",
            Self::Sound => "070000",
            Self::Vfx => "080000",
            Self::Exd => "0a0000",
            Self::GameScript => "0b0000",
            Self::Music => "0c0000",
        }
    }

    /// Lower-case name, also the first path segment of game paths.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Bgcommon => "bgcommon",
            Self::Bg => "bg",
            Self::Cut => "cut",
            Self::Chara => "chara",
            Self::Shader => "shader",
            Self::Ui => "ui",
            Self::Sound => "sound",
            Self::Vfx => "vfx",
            Self::Exd => "exd",
            Self::GameScript => "game_script",
            Self::Music => "music",
        }
    }

    /// Category of a game path such as `chara/equipment/e0001/model.mdl`.
    pub fn from_game_path(path: &str) -> Option<Self> {
        let root = path.split('/').next()?;
        Self::ALL.into_iter().find(|category| category.name() == root)
    }

    /// File name of container `number`: `{key}.win32.dat{number}`.
    pub fn container_file_name(self, number: u8) -> String {
        format!("{}.{PLATFORM}.dat{number}", self.key())
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataCategory {
    type Err = StorageError;

    /// Accepts either the name (`chara`) or the key (`040000`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.name() == s || category.key() == s)
            .ok_or_else(|| StorageError::Config(format!("unknown data category: {s}")))
    }
}

/// Parse a container file name like `040000.win32.dat3`.
///
/// Returns `None` for other files and for numbers above 7.
pub fn parse_container_file_name(file_name: &str) -> Option<(DataCategory, u8)> {
    let (key, rest) = file_name.split_once('.')?;
    let suffix = rest.strip_prefix(PLATFORM)?.strip_prefix(".dat")?;

    if suffix.len() != 1 || !suffix.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let number: u8 = suffix.parse().ok()?;
    if number > MAX_CONTAINER_NUMBER {
        return None;
    }

    let category = DataCategory::ALL
        .into_iter()
        .find(|category| category.key() == key)?;
    Some((category, number))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_and_names() {
        assert_eq!(DataCategory::Chara.key(), "040000");
        assert_eq!(DataCategory::Exd.key(), "0a0000");
        assert_eq!(DataCategory::Music.key(), "0c0000");
        assert_eq!(DataCategory::GameScript.name(), "game_script");
        assert_eq!(DataCategory::Ui.to_string(), "ui");
    }

    #[test]
    fn test_from_str() {
        assert_eq!("chara".parse::<DataCategory>().unwrap(), DataCategory::Chara);
        assert_eq!("0a0000".parse::<DataCategory>().unwrap(), DataCategory::Exd);
        assert!("textures".parse::<DataCategory>().is_err());
    }

    #[test]
    fn test_from_game_path() {
        assert_eq!(
            DataCategory::from_game_path("chara/equipment/e0001/model/c0201e0001_top.mdl"),
            Some(DataCategory::Chara)
        );
        assert_eq!(
            DataCategory::from_game_path("bgcommon/texture/dummy.tex"),
            Some(DataCategory::Bgcommon)
        );
        assert_eq!(DataCategory::from_game_path("nowhere/file"), None);
    }

    #[test]
    fn test_container_file_names() {
        assert_eq!(
            DataCategory::Chara.container_file_name(3),
            "040000.win32.dat3"
        );
        assert_eq!(
            parse_container_file_name("040000.win32.dat3"),
            Some((DataCategory::Chara, 3))
        );
        assert_eq!(
            parse_container_file_name("0a0000.win32.dat0"),
            Some((DataCategory::Exd, 0))
        );
        assert_eq!(parse_container_file_name("040000.win32.dat8"), None);
        assert_eq!(parse_container_file_name("040000.win32.index"), None);
        assert_eq!(parse_container_file_name("ffffff.win32.dat0"), None);
    }
}

pub mod ingest;
pub mod provider;
pub mod timeline;

use anyhow::{anyhow, Error};
use std::fmt;
use std::str::FromStr;

/// Upstream platform region. Stored lowercase, displayed as the upstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Br,
    Eune,
    Euw,
    Jp,
    Kr,
    Lan,
    Las,
    Na,
    Oce,
    Ru,
    Tr,
}

impl Region {
    pub fn as_str(self) -> &'static str {
        match self {
            Region::Br => "br",
            Region::Eune => "eune",
            Region::Euw => "euw",
            Region::Jp => "jp",
            Region::Kr => "kr",
            Region::Lan => "lan",
            Region::Las => "las",
            Region::Na => "na",
            Region::Oce => "oce",
            Region::Ru => "ru",
            Region::Tr => "tr",
        }
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "br" => Ok(Region::Br),
            "eune" => Ok(Region::Eune),
            "euw" => Ok(Region::Euw),
            "jp" => Ok(Region::Jp),
            "kr" => Ok(Region::Kr),
            "lan" => Ok(Region::Lan),
            "las" => Ok(Region::Las),
            "na" => Ok(Region::Na),
            "oce" => Ok(Region::Oce),
            "ru" => Ok(Region::Ru),
            "tr" => Ok(Region::Tr),
            other => Err(anyhow!("unknown region `{other}`")),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four Discogs snapshot data kinds, shared by the extractor (as a publish routing key),
/// the broker topology (as a queue/table suffix), and both consumers (as a graph label / table name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Artists,
    Labels,
    Masters,
    Releases,
}

impl DataType {
    pub fn all() -> [DataType; 4] {
        [DataType::Artists, DataType::Labels, DataType::Masters, DataType::Releases]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Artists => "artists",
            DataType::Labels => "labels",
            DataType::Masters => "masters",
            DataType::Releases => "releases",
        }
    }

    /// AMQP routing key for this data type; identical to `as_str` by convention.
    pub fn routing_key(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "artists" => Ok(DataType::Artists),
            "labels" => Ok(DataType::Labels),
            "masters" => Ok(DataType::Masters),
            "releases" => Ok(DataType::Releases),
            _ => Err(format!("unknown data type: {}", s)),
        }
    }
}

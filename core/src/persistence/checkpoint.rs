use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Persisted state of the energy integrator, timestamps in Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyCheckpoint {
    pub last_reset: i64,
    pub last_save: i64,
    pub cumulative_sum: f64,
}

#[derive(thiserror::Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint is missing the {0} field")]
    MissingField(&'static str),
    #[error("checkpoint has unexpected trailing content {0:?}")]
    UnexpectedField(String),
    #[error("checkpoint field {field} is not an integer timestamp: {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },
    #[error("checkpoint sum is not a finite number: {0:?}")]
    InvalidSum(String),
    #[error("checkpoint saved at {last_save} precedes its reset at {last_reset}")]
    Inconsistent { last_reset: i64, last_save: i64 },
}

impl EnergyCheckpoint {
    /// Zero energy with both timestamps at `now`.
    pub fn fresh(now: i64) -> Self {
        Self {
            last_reset: now,
            last_save: now,
            cumulative_sum: 0.0,
        }
    }

    /// Three newline-terminated lines: reset time, save time, sum.
    pub fn encode(&self) -> String {
        format!(
            "{}\n{}\n{}\n",
            self.last_reset, self.last_save, self.cumulative_sum
        )
    }

    pub fn decode(text: &str) -> Result<Self, CheckpointError> {
        let mut lines = text.lines().map(str::trim);

        let last_reset = parse_timestamp(lines.next(), "last_reset")?;
        let last_save = parse_timestamp(lines.next(), "last_save")?;
        let raw_sum = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or(CheckpointError::MissingField("cumulative_sum"))?;
        let cumulative_sum = raw_sum
            .parse::<f64>()
            .ok()
            .filter(|sum| sum.is_finite())
            .ok_or_else(|| CheckpointError::InvalidSum(raw_sum.to_string()))?;

        if let Some(extra) = lines.find(|line| !line.is_empty()) {
            return Err(CheckpointError::UnexpectedField(extra.to_string()));
        }
        if last_save < last_reset {
            return Err(CheckpointError::Inconsistent {
                last_reset,
                last_save,
            });
        }

        Ok(Self {
            last_reset,
            last_save,
            cumulative_sum,
        })
    }
}

fn parse_timestamp(line: Option<&str>, field: &'static str) -> Result<i64, CheckpointError> {
    let line = line
        .filter(|line| !line.is_empty())
        .ok_or(CheckpointError::MissingField(field))?;
    line.parse::<i64>()
        .map_err(|_| CheckpointError::InvalidTimestamp {
            field,
            value: line.to_string(),
        })
}

/// Reads and atomically rewrites the checkpoint file at one path.
///
/// A store assumes it is the only writer of its path.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<EnergyCheckpoint, CheckpointError> {
        let contents = fs::read_to_string(&self.path)?;
        EnergyCheckpoint::decode(&contents)
    }

    /// Writes a sibling temporary file and renames it over the checkpoint.
    pub fn save(&self, checkpoint: &EnergyCheckpoint) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(checkpoint.encode().as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_uses_three_lines() {
        let checkpoint = EnergyCheckpoint {
            last_reset: 1_700_000_000,
            last_save: 1_700_000_600,
            cumulative_sum: 12.5,
        };
        assert_eq!(checkpoint.encode(), "1700000000\n1700000600\n12.5\n");
    }

    #[test]
    fn file_round_trip_preserves_triple() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("energy.txt"));
        let checkpoint = EnergyCheckpoint {
            last_reset: 1_690_000_000,
            last_save: 1_690_123_456,
            cumulative_sum: 0.1 + 0.2,
        };
        store.save(&checkpoint).unwrap();
        assert_eq!(store.load().unwrap(), checkpoint);
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn save_creates_missing_directories_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested").join("energy.txt"));
        store.save(&EnergyCheckpoint::fresh(10)).unwrap();
        let updated = EnergyCheckpoint {
            last_reset: 10,
            last_save: 20,
            cumulative_sum: 3.25,
        };
        store.save(&updated).unwrap();
        assert_eq!(store.load().unwrap(), updated);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("absent.txt"));
        assert!(matches!(store.load(), Err(CheckpointError::Io(_))));
    }

    #[test]
    fn malformed_contents_are_rejected() {
        assert!(matches!(
            EnergyCheckpoint::decode("10\n20\n"),
            Err(CheckpointError::MissingField("cumulative_sum"))
        ));
        assert!(matches!(
            EnergyCheckpoint::decode("ten\n20\n1.0\n"),
            Err(CheckpointError::InvalidTimestamp { field: "last_reset", .. })
        ));
        assert!(matches!(
            EnergyCheckpoint::decode("10\n20\nabc\n"),
            Err(CheckpointError::InvalidSum(_))
        ));
        assert!(matches!(
            EnergyCheckpoint::decode("10\n20\n1.0\n4\n"),
            Err(CheckpointError::UnexpectedField(_))
        ));
        assert!(matches!(
            EnergyCheckpoint::decode("30\n20\n1.0\n"),
            Err(CheckpointError::Inconsistent { .. })
        ));
        assert!(EnergyCheckpoint::decode("").is_err());
    }

    #[test]
    fn decode_tolerates_surrounding_whitespace() {
        let checkpoint = EnergyCheckpoint::decode(" 10 \n20\r\n-2.5e3\n\n").unwrap();
        assert_eq!(checkpoint.cumulative_sum, -2500.0);
    }
}

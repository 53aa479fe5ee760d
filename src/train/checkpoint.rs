use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::agent::{Parameters, Policy};
use crate::error::Result;

/// File name of the checkpoint inside a run directory.
pub const CHECKPOINT_FILE: &str = "models.save";

/// Learned parameters of both agents at the end of a run.
#[derive(Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub sender: Parameters,
    pub recver: Parameters,
}

impl Checkpoint {
    pub fn capture(sender: &dyn Policy, recver: &dyn Policy) -> Self {
        Checkpoint {
            sender: sender.parameters(),
            recver: recver.parameters(),
        }
    }

    pub fn restore(self, sender: &mut dyn Policy, recver: &mut dyn Policy) -> Result<()> {
        sender.load_parameters(self.sender)?;
        recver.load_parameters(self.recver)
    }

    /// Save checkpoint to disk
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serialized = bincode::serialize(self)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    /// Load checkpoint from disk; `Ok(None)` when there is no file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(path)?;
        Ok(Some(bincode::deserialize(&data)?))
    }
}

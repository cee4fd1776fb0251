//! Channel adaptation between loaded tiles and the network input
//!
//! `Strict` refuses any mismatch. `RepeatBlock` fills missing channels by
//! cycling the available block (3 -> 6 yields RGBRGB); it is a compatibility
//! shim for checkpoints trained on duplicated imagery and must be opted into.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::error::{Result, SentinelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelAdapter {
    #[default]
    Strict,
    RepeatBlock,
}

impl ChannelAdapter {
    /// Adapt band-major `data` holding `channels` planes of `plane` values
    /// to exactly `target` planes.
    pub fn adapt(&self, data: Vec<f32>, channels: usize, plane: usize, target: usize) -> Result<Vec<f32>> {
        if channels == target {
            return Ok(data);
        }
        if channels == 0 || channels > target {
            return Err(SentinelError::Configuration(format!(
                "tile has {} channels, network expects {}",
                channels, target
            )));
        }

        match self {
            ChannelAdapter::Strict => Err(SentinelError::Configuration(format!(
                "tile has {} channels, network expects {} (channel adapter is strict)",
                channels, target
            ))),
            ChannelAdapter::RepeatBlock => {
                debug!("Repeating {} channels to fill {}", channels, target);
                let mut out = Vec::with_capacity(target * plane);
                for c in 0..target {
                    let src = c % channels;
                    out.extend_from_slice(&data[src * plane..(src + 1) * plane]);
                }
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_channels_pass_through() {
        let data = vec![1.0, 2.0, 3.0];
        assert_eq!(ChannelAdapter::Strict.adapt(data.clone(), 3, 1, 3).unwrap(), data);
    }

    #[test]
    fn test_strict_rejects_mismatch() {
        let err = ChannelAdapter::Strict.adapt(vec![0.0; 6], 3, 2, 6).unwrap_err();
        assert!(matches!(err, SentinelError::Configuration(_)));
    }

    #[test]
    fn test_repeat_block_duplicates_in_order() {
        let data = vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0];
        let out = ChannelAdapter::RepeatBlock.adapt(data, 3, 2, 6).unwrap();
        assert_eq!(out, vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_more_channels_than_network_is_error() {
        let err = ChannelAdapter::RepeatBlock.adapt(vec![0.0; 4], 4, 1, 3).unwrap_err();
        assert!(matches!(err, SentinelError::Configuration(_)));
    }
}

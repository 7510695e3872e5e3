//! Frame grabbing from a live detector source.
//!
//! The detector's "is playing" flag is shared with whatever else drives the
//! same hardware, so starting is idempotent: a source that is already live is
//! left alone. Frames are accepted as delivered; there is no quality check and
//! no timeout on the grab.

use tracing::{debug, info};

use crate::data::frame::Frame;
use crate::error::{AppResult, SweepError};
use crate::hardware::capabilities::DetectorSource;

/// Pulls fresh frames from a detector source.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameGrabber;

impl FrameGrabber {
    /// Make sure `source` is live, then block until its next fresh frame.
    pub async fn grab<D: DetectorSource>(&self, source: &D) -> AppResult<Frame<D::Sample>> {
        if !source.is_playing().await {
            info!(source = source.source_id(), "Starting detector");
            source
                .start_playing()
                .await
                .map_err(|err| detector_error(source, err))?;
        }

        let frame = source
            .grab_next_to_start()
            .await
            .map_err(|err| detector_error(source, err))?;
        let (rows, cols) = frame.shape();
        debug!(source = source.source_id(), rows, cols, "Frame grabbed");
        Ok(frame)
    }
}

fn detector_error<D: DetectorSource>(source: &D, err: anyhow::Error) -> SweepError {
    SweepError::Detector {
        source_id: source.source_id().to_string(),
        message: format!("{err:#}"),
    }
}

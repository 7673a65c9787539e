//! File formats around `genetic_demux`: count matrices in, result files out.
#![deny(missing_docs)]

use genetic_demux::DemuxEvent;
use log::{info, warn};

pub mod config;
pub mod matrix;
pub mod outputs;
pub mod vcf;

/// Forward run diagnostics to the log.
pub fn log_events(events: &[DemuxEvent]) {
    for event in events {
        if event.is_warning() {
            warn!("{event}");
        } else {
            info!("{event}");
        }
    }
}

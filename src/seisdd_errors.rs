use thiserror::Error;

use crate::constants::{EventId, Kilometer};

#[derive(Error, Debug)]
pub enum SeisddError {
    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    #[error("Event {event} has {found} neighbours, {required} required")]
    NotEnoughNeighbours {
        event: EventId,
        found: usize,
        required: usize,
    },

    #[error("Location lat {lat} lon {lon} depth {depth} outside grid '{grid}'")]
    OutOfGridRange {
        grid: String,
        lat: f64,
        lon: f64,
        depth: Kilometer,
    },

    #[error("Malformed grid file {0}: {1}")]
    GridFormat(String, String),

    #[error("Waveform not available: {0}")]
    WaveformUnavailable(String),

    #[error("SNR {snr} below threshold {threshold} for {stream}")]
    SnrBelowThreshold {
        stream: String,
        snr: f64,
        threshold: f64,
    },

    #[error("Solver did not converge: {0}")]
    SolverDidNotConverge(String),

    #[error("Unable to perform file operation: {0}")]
    IoFailure(#[from] std::io::Error),
}

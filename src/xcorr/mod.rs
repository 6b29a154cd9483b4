//! Cross-correlation of phase waveforms between event pairs.
//!
//! For each candidate pair the short signal window of the second phase is
//! slid over the long window of the first one within the configured
//! maximum delay; the peak of the normalised correlation series gives the
//! lag that refines the differential travel time. Components are tried in
//! the configured priority order and the first pair that loads wins.

pub mod waveform;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{Event, Phase, PhaseType};
use crate::constants::{EventId, FastMap, Seconds};
use crate::seisdd_errors::SeisddError;
use crate::xcorr::waveform::{TimeWindow, WaveformLoader};

/// Cross-correlation configuration for one phase type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XCorrOptions {
    /// min cross-correlation coefficient required (0-1)
    pub min_coef: f64,
    /// signal window start relative to the pick (secs)
    pub start_offset: Seconds,
    /// signal window end relative to the pick (secs)
    pub end_offset: Seconds,
    /// maximum lag searched on both sides (secs)
    pub max_delay: Seconds,
    /// priority list of components to try
    pub components: Vec<String>,
}

impl Default for XCorrOptions {
    fn default() -> Self {
        XCorrOptions {
            min_coef: 0.5,
            start_offset: -0.5,
            end_offset: 0.75,
            max_delay: 0.5,
            components: vec!["Z".to_string()],
        }
    }
}

/// Accepted correlation of one (event, station, phase) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct XCorrEntry {
    pub coefficient: f64,
    pub lag: Seconds,
    pub component: String,
}

/// Two-level cache keyed by `(event 1, phase type)` then
/// `(event 2, station)`.
#[derive(Debug, Default)]
pub struct XCorrCache {
    map: FastMap<(EventId, PhaseType), FastMap<(EventId, String), XCorrEntry>>,
}

impl XCorrCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(
        &self,
        ev1: EventId,
        phase_type: PhaseType,
        ev2: EventId,
        station_id: &str,
    ) -> bool {
        self.get(ev1, phase_type, ev2, station_id).is_some()
    }

    pub fn get(
        &self,
        ev1: EventId,
        phase_type: PhaseType,
        ev2: EventId,
        station_id: &str,
    ) -> Option<&XCorrEntry> {
        self.map
            .get(&(ev1, phase_type))
            .and_then(|inner| inner.get(&(ev2, station_id.to_string())))
    }

    /// Store an accepted correlation in both directions (the lag flips
    /// sign when the events swap roles).
    pub fn insert(
        &mut self,
        ev1: EventId,
        phase_type: PhaseType,
        ev2: EventId,
        station_id: &str,
        entry: XCorrEntry,
    ) {
        let reversed = XCorrEntry {
            coefficient: entry.coefficient,
            lag: -entry.lag,
            component: entry.component.clone(),
        };
        self.map
            .entry((ev1, phase_type))
            .or_default()
            .insert((ev2, station_id.to_string()), entry);
        self.map
            .entry((ev2, phase_type))
            .or_default()
            .insert((ev1, station_id.to_string()), reversed);
    }

    pub fn len(&self) -> usize {
        self.map.values().map(|inner| inner.len()).sum::<usize>() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Per-run cross-correlation and waveform counters, aggregated into the
/// run diagnostics instead of living in process-wide state.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counters {
    pub xcorr_performed: u32,
    pub xcorr_performed_s: u32,
    pub xcorr_performed_theo: u32,
    pub xcorr_performed_s_theo: u32,
    pub xcorr_good_cc: u32,
    pub xcorr_good_cc_s: u32,
    pub xcorr_good_cc_theo: u32,
    pub xcorr_good_cc_s_theo: u32,
    pub wf_downloaded: u32,
    pub wf_no_avail: u32,
    pub wf_snr_low: u32,
}

impl Counters {
    fn record_performed(&mut self, phase_type: PhaseType, theoretical: bool) {
        self.xcorr_performed += 1;
        if phase_type == PhaseType::S {
            self.xcorr_performed_s += 1;
        }
        if theoretical {
            self.xcorr_performed_theo += 1;
            if phase_type == PhaseType::S {
                self.xcorr_performed_s_theo += 1;
            }
        }
    }

    fn record_good(&mut self, phase_type: PhaseType, theoretical: bool) {
        self.xcorr_good_cc += 1;
        if phase_type == PhaseType::S {
            self.xcorr_good_cc_s += 1;
        }
        if theoretical {
            self.xcorr_good_cc_theo += 1;
            if phase_type == PhaseType::S {
                self.xcorr_good_cc_s_theo += 1;
            }
        }
    }
}

/// Peak of the normalised cross-correlation of `short` slid over `long`.
/// Returns the coefficient and the sample offset of the peak, or None
/// when either window is degenerate.
pub fn cross_correlate(long: &[f64], short: &[f64]) -> Option<(f64, usize)> {
    if short.is_empty() || long.len() < short.len() {
        return None;
    }
    let n = short.len();
    let short_mean = short.iter().sum::<f64>() / n as f64;
    let short_dev: Vec<f64> = short.iter().map(|v| v - short_mean).collect();
    let short_norm = short_dev.iter().map(|v| v * v).sum::<f64>().sqrt();
    if short_norm == 0.0 {
        return None;
    }

    let mut best: Option<(f64, usize)> = None;
    for offset in 0..=(long.len() - n) {
        let segment = &long[offset..offset + n];
        let seg_mean = segment.iter().sum::<f64>() / n as f64;
        let mut dot = 0.0;
        let mut seg_norm_sq = 0.0;
        for (s, l) in short_dev.iter().zip(segment) {
            let l_dev = l - seg_mean;
            dot += s * l_dev;
            seg_norm_sq += l_dev * l_dev;
        }
        if seg_norm_sq == 0.0 {
            continue;
        }
        let coefficient = dot / (short_norm * seg_norm_sq.sqrt());
        if best.map(|(c, _)| coefficient > c).unwrap_or(true) {
            best = Some((coefficient, offset));
        }
    }
    best
}

pub struct XCorrEngine<L> {
    loader: L,
    p_options: XCorrOptions,
    s_options: XCorrOptions,
    pub counters: Counters,
}

impl<L: WaveformLoader> XCorrEngine<L> {
    pub fn new(loader: L, p_options: XCorrOptions, s_options: XCorrOptions) -> Self {
        Self {
            loader,
            p_options,
            s_options,
            counters: Counters::default(),
        }
    }

    pub fn options(&self, phase_type: PhaseType) -> &XCorrOptions {
        match phase_type {
            PhaseType::P => &self.p_options,
            PhaseType::S => &self.s_options,
        }
    }

    /// Correlate one phase pair. Returns the accepted entry, or None when
    /// no component pair loads or the best coefficient stays below the
    /// minimum.
    pub fn correlate_phases(
        &mut self,
        _event1: &Event,
        phase1: &Phase,
        _event2: &Event,
        phase2: &Phase,
    ) -> Option<XCorrEntry> {
        let phase_type = phase1.phase_type;
        let theoretical = phase1.is_theoretical || phase2.is_theoretical;
        let options = self.options(phase_type).clone();

        for component in &options.components {
            match self.try_component(phase1, phase2, &options, component) {
                Ok((coefficient, lag)) => {
                    self.counters.record_performed(phase_type, theoretical);
                    if coefficient >= options.min_coef {
                        self.counters.record_good(phase_type, theoretical);
                        return Some(XCorrEntry {
                            coefficient,
                            lag,
                            component: component.clone(),
                        });
                    }
                    return None;
                }
                Err(SeisddError::SnrBelowThreshold { .. }) => {
                    self.counters.wf_snr_low += 1;
                }
                Err(_) => {
                    self.counters.wf_no_avail += 1;
                }
            }
        }
        None
    }

    fn try_component(
        &mut self,
        phase1: &Phase,
        phase2: &Phase,
        options: &XCorrOptions,
        component: &str,
    ) -> Result<(f64, Seconds), SeisddError> {
        let stream1 = stream_id(&phase1.station_id, component);
        let stream2 = stream_id(&phase2.station_id, component);

        let long_window = TimeWindow::around(
            phase1.time,
            options.start_offset - options.max_delay,
            options.end_offset + options.max_delay,
        );
        let short_window = TimeWindow::around(phase2.time, options.start_offset, options.end_offset);

        let long = self.loader.load(&stream1, &long_window, phase1.time)?;
        self.counters.wf_downloaded += 1;
        let short = self.loader.load(&stream2, &short_window, phase2.time)?;
        self.counters.wf_downloaded += 1;

        // correlation needs a common sampling rate
        let short = if (short.sampling_rate - long.sampling_rate).abs() > f64::EPSILON {
            short.resampled(long.sampling_rate)
        } else {
            short
        };

        let (coefficient, offset) = cross_correlate(&long.data, &short.data).ok_or_else(|| {
            SeisddError::WaveformUnavailable(format!("{stream1}: degenerate windows"))
        })?;
        let lag = offset as f64 / long.sampling_rate - options.max_delay;
        debug!(stream = %stream1, coefficient, lag, "xcorr");
        Ok((coefficient, lag))
    }
}

fn stream_id(station_id: &str, component: &str) -> String {
    format!("{station_id}.{component}")
}

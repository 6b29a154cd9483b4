//! Waveform access for the cross-correlation engine.
//!
//! The engine sees a single [`WaveformLoader`] operation; concrete access
//! is built by composing layers around the raw source:
//! raw -> disk cache -> SNR gate -> memory cache. Each layer receives the
//! pick time of the phase the window belongs to, so the SNR gate can
//! place its noise and signal windows.

use std::collections::VecDeque;

use camino::{Utf8Path, Utf8PathBuf};
use hifitime::Epoch;
use serde::{Deserialize, Serialize};

use crate::constants::{FastMap, Seconds};
use crate::seisdd_errors::SeisddError;
use crate::time::{add_seconds, seconds_between};

/// Waveforms cached on disk always span at least this many seconds
/// centred on the pick, so small changes of the correlation windows do
/// not force a re-download.
pub const DISK_TRACE_MIN_LEN: Seconds = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: Epoch,
    pub end: Epoch,
}

impl TimeWindow {
    pub fn new(start: Epoch, end: Epoch) -> Self {
        TimeWindow { start, end }
    }

    pub fn around(center: Epoch, start_offset: Seconds, end_offset: Seconds) -> Self {
        TimeWindow {
            start: add_seconds(center, start_offset),
            end: add_seconds(center, end_offset),
        }
    }

    pub fn length(&self) -> Seconds {
        seconds_between(self.end, self.start)
    }

    pub fn contains(&self, other: &TimeWindow) -> bool {
        self.start <= other.start && self.end >= other.end
    }
}

/// A single-component waveform snippet with a uniform sampling rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub stream_id: String,
    pub start: Epoch,
    pub sampling_rate: f64,
    pub data: Vec<f64>,
}

impl Trace {
    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start,
            end: add_seconds(self.start, self.data.len() as f64 / self.sampling_rate),
        }
    }

    /// Cut the trace to a sub-window. Fails when the requested window is
    /// not fully covered.
    pub fn slice(&self, window: &TimeWindow) -> Result<Trace, SeisddError> {
        if !self.window().contains(window) {
            return Err(SeisddError::WaveformUnavailable(format!(
                "{}: requested window not covered",
                self.stream_id
            )));
        }
        let first = (seconds_between(window.start, self.start) * self.sampling_rate).round() as usize;
        let count = (window.length() * self.sampling_rate).round() as usize;
        let last = (first + count).min(self.data.len());
        Ok(Trace {
            stream_id: self.stream_id.clone(),
            start: add_seconds(self.start, first as f64 / self.sampling_rate),
            sampling_rate: self.sampling_rate,
            data: self.data[first..last].to_vec(),
        })
    }

    /// Root mean square amplitude of the samples inside a window.
    pub fn rms(&self, window: &TimeWindow) -> Result<f64, SeisddError> {
        let cut = self.slice(window)?;
        if cut.data.is_empty() {
            return Ok(0.0);
        }
        let sum: f64 = cut.data.iter().map(|v| v * v).sum();
        Ok((sum / cut.data.len() as f64).sqrt())
    }

    /// Resample to a new rate by linear interpolation.
    pub fn resampled(&self, new_rate: f64) -> Trace {
        if (new_rate - self.sampling_rate).abs() < f64::EPSILON || self.data.is_empty() {
            return self.clone();
        }
        let duration = self.data.len() as f64 / self.sampling_rate;
        let new_len = (duration * new_rate).round() as usize;
        let mut data = Vec::with_capacity(new_len);
        for i in 0..new_len {
            let t = i as f64 / new_rate * self.sampling_rate;
            let i0 = t.floor() as usize;
            let frac = t - i0 as f64;
            let v0 = self.data[i0.min(self.data.len() - 1)];
            let v1 = self.data[(i0 + 1).min(self.data.len() - 1)];
            data.push(v0 + (v1 - v0) * frac);
        }
        Trace {
            stream_id: self.stream_id.clone(),
            start: self.start,
            sampling_rate: new_rate,
            data,
        }
    }
}

/// Waveform pre-processing configuration. The filter string is passed
/// through to the raw source; resampling is applied by the loader chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WfFilterOptions {
    pub filter_str: String,
    /// target sampling rate in Hz, 0 disables resampling
    pub resample_freq: f64,
}

/// Signal-to-noise gate configuration: window offsets are seconds
/// relative to the pick time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnrOptions {
    pub min_snr: f64,
    pub noise_start: Seconds,
    pub noise_end: Seconds,
    pub signal_start: Seconds,
    pub signal_end: Seconds,
}

pub trait WaveformLoader {
    /// Load one stream over a time window; `pick_time` is the phase pick
    /// the window belongs to.
    fn load(
        &mut self,
        stream_id: &str,
        window: &TimeWindow,
        pick_time: Epoch,
    ) -> Result<Trace, SeisddError>;
}

impl<L: WaveformLoader + ?Sized> WaveformLoader for Box<L> {
    fn load(
        &mut self,
        stream_id: &str,
        window: &TimeWindow,
        pick_time: Epoch,
    ) -> Result<Trace, SeisddError> {
        (**self).load(stream_id, window, pick_time)
    }
}

/// SNR gate: rejects traces whose signal/noise RMS ratio is below the
/// configured minimum. A `min_snr` of 0 disables the gate.
pub struct SnrFilteredLoader<L> {
    inner: L,
    snr: SnrOptions,
}

impl<L> SnrFilteredLoader<L> {
    pub fn new(inner: L, snr: SnrOptions) -> Self {
        Self { inner, snr }
    }
}

impl<L: WaveformLoader> WaveformLoader for SnrFilteredLoader<L> {
    fn load(
        &mut self,
        stream_id: &str,
        window: &TimeWindow,
        pick_time: Epoch,
    ) -> Result<Trace, SeisddError> {
        let trace = self.inner.load(stream_id, window, pick_time)?;
        if self.snr.min_snr <= 0.0 {
            return Ok(trace);
        }
        let noise = TimeWindow::around(pick_time, self.snr.noise_start, self.snr.noise_end);
        let signal = TimeWindow::around(pick_time, self.snr.signal_start, self.snr.signal_end);
        let noise_rms = trace.rms(&noise)?;
        let signal_rms = trace.rms(&signal)?;
        let snr = if noise_rms > 0.0 {
            signal_rms / noise_rms
        } else {
            f64::INFINITY
        };
        if snr < self.snr.min_snr {
            return Err(SeisddError::SnrBelowThreshold {
                stream: stream_id.to_string(),
                snr,
                threshold: self.snr.min_snr,
            });
        }
        Ok(trace)
    }
}

/// In-memory cache with a soft byte budget and LRU eviction. Entries are
/// keyed by stream and window (at millisecond granularity); a cached
/// trace covering the requested window is sliced instead of re-loaded.
pub struct MemCachedLoader<L> {
    inner: L,
    budget_bytes: usize,
    used_bytes: usize,
    cache: FastMap<String, Trace>,
    lru: VecDeque<String>,
}

impl<L> MemCachedLoader<L> {
    pub fn new(inner: L, budget_bytes: usize) -> Self {
        Self {
            inner,
            budget_bytes,
            used_bytes: 0,
            cache: FastMap::default(),
            lru: VecDeque::new(),
        }
    }

    fn cache_key(stream_id: &str, window: &TimeWindow) -> String {
        format!("{stream_id}@{}+{}ms", window.start, (window.length() * 1000.0).round())
    }

    fn evict_to_budget(&mut self) {
        while self.used_bytes > self.budget_bytes {
            let Some(oldest) = self.lru.pop_front() else {
                break;
            };
            if let Some(trace) = self.cache.remove(&oldest) {
                self.used_bytes -= trace.data.len() * std::mem::size_of::<f64>();
            }
        }
    }
}

impl<L: WaveformLoader> WaveformLoader for MemCachedLoader<L> {
    fn load(
        &mut self,
        stream_id: &str,
        window: &TimeWindow,
        pick_time: Epoch,
    ) -> Result<Trace, SeisddError> {
        let key = Self::cache_key(stream_id, window);
        if let Some(trace) = self.cache.get(&key) {
            return Ok(trace.clone());
        }
        let trace = self.inner.load(stream_id, window, pick_time)?;
        self.used_bytes += trace.data.len() * std::mem::size_of::<f64>();
        self.cache.insert(key.clone(), trace.clone());
        self.lru.push_back(key);
        self.evict_to_budget();
        Ok(trace)
    }
}

/// Disk cache. The stored window is extended to at least
/// [`DISK_TRACE_MIN_LEN`] centred on the pick, and the requested slice is
/// cut from the stored trace, so configuration tweaks that slightly move
/// the correlation windows do not invalidate the cache.
pub struct DiskCachedLoader<L> {
    inner: L,
    cache_dir: Utf8PathBuf,
}

impl<L> DiskCachedLoader<L> {
    pub fn new(inner: L, cache_dir: &Utf8Path) -> Result<Self, SeisddError> {
        std::fs::create_dir_all(cache_dir)?;
        Ok(Self {
            inner,
            cache_dir: cache_dir.to_owned(),
        })
    }

    fn cache_path(&self, stream_id: &str, pick_time: Epoch) -> Utf8PathBuf {
        let stamp = format!("{pick_time}").replace([':', ' ', '.'], "-");
        self.cache_dir.join(format!("{stream_id}.{stamp}.trace"))
    }

    fn stored_window(window: &TimeWindow, pick_time: Epoch) -> TimeWindow {
        let half = DISK_TRACE_MIN_LEN / 2.0;
        TimeWindow {
            start: window.start.min(add_seconds(pick_time, -half)),
            end: window.end.max(add_seconds(pick_time, half)),
        }
    }

    fn read_trace(path: &Utf8Path, stream_id: &str) -> Option<Trace> {
        let bytes = std::fs::read(path).ok()?;
        if bytes.len() < 24 {
            return None;
        }
        let start_s = f64::from_le_bytes(bytes[0..8].try_into().ok()?);
        let rate = f64::from_le_bytes(bytes[8..16].try_into().ok()?);
        let count = u64::from_le_bytes(bytes[16..24].try_into().ok()?) as usize;
        if bytes.len() != 24 + count * 8 || rate <= 0.0 {
            return None;
        }
        let data = bytes[24..]
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        Some(Trace {
            stream_id: stream_id.to_string(),
            start: Epoch::from_unix_seconds(start_s),
            sampling_rate: rate,
            data,
        })
    }

    fn write_trace(path: &Utf8Path, trace: &Trace) -> Result<(), SeisddError> {
        let mut bytes = Vec::with_capacity(24 + trace.data.len() * 8);
        bytes.extend_from_slice(&trace.start.to_unix_seconds().to_le_bytes());
        bytes.extend_from_slice(&trace.sampling_rate.to_le_bytes());
        bytes.extend_from_slice(&(trace.data.len() as u64).to_le_bytes());
        for v in &trace.data {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

impl<L: WaveformLoader> WaveformLoader for DiskCachedLoader<L> {
    fn load(
        &mut self,
        stream_id: &str,
        window: &TimeWindow,
        pick_time: Epoch,
    ) -> Result<Trace, SeisddError> {
        let path = self.cache_path(stream_id, pick_time);
        if let Some(stored) = Self::read_trace(&path, stream_id) {
            if let Ok(cut) = stored.slice(window) {
                return Ok(cut);
            }
        }
        let stored_window = Self::stored_window(window, pick_time);
        let trace = self.inner.load(stream_id, &stored_window, pick_time)?;
        Self::write_trace(&path, &trace)?;
        trace.slice(window)
    }
}

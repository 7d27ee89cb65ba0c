use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat};
use ringbuf::traits::{Consumer as _, Producer as _, Split as _};
use ringbuf::HeapRb;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f32::consts::PI;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// FFT window for the analyzer.
pub const FFT_SIZE: usize = 2048;
/// Spectral magnitude smoothing constant (weight on the previous frame).
pub const SMOOTHING: f32 = 0.3;
/// Frames with `energy` below this gate downstream consumers.
pub const SILENCE_THRESHOLD: f32 = 0.05;
/// Energy history length feeding the rhythm estimate.
pub const ENERGY_HISTORY: usize = 60;
/// Autocorrelation window for the rhythm estimate.
pub const RHYTHM_WINDOW: usize = 15;

/// One per-frame feature record. Produced by the analyzer thread, consumed
/// by the reactivity router; engines never open their own audio input.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioFeatures {
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
    pub energy: f32,
    pub transient: f32,
    pub rhythm: f32,
    pub peak: f32,
    pub smooth: f32,
}

impl AudioFeatures {
    pub fn is_silent(&self) -> bool {
        self.energy < SILENCE_THRESHOLD
    }
}

/// Seqlock-published features: the analyzer thread stores, the host tick
/// loads without blocking. Odd sequence means a write is in progress.
pub struct AtomicAudioFeatures {
    seq: AtomicU64,
    bass: AtomicU32,
    mid: AtomicU32,
    high: AtomicU32,
    energy: AtomicU32,
    transient: AtomicU32,
    rhythm: AtomicU32,
    peak: AtomicU32,
    smooth: AtomicU32,
    updated_ms: AtomicU64,
}

impl AtomicAudioFeatures {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            bass: AtomicU32::new(0),
            mid: AtomicU32::new(0),
            high: AtomicU32::new(0),
            energy: AtomicU32::new(0),
            transient: AtomicU32::new(0),
            rhythm: AtomicU32::new(0),
            peak: AtomicU32::new(0),
            smooth: AtomicU32::new(0),
            updated_ms: AtomicU64::new(0),
        }
    }

    pub fn store(&self, f: AudioFeatures) {
        self.seq.fetch_add(1, Ordering::Release); // odd => write in progress
        self.bass.store(f.bass.to_bits(), Ordering::Relaxed);
        self.mid.store(f.mid.to_bits(), Ordering::Relaxed);
        self.high.store(f.high.to_bits(), Ordering::Relaxed);
        self.energy.store(f.energy.to_bits(), Ordering::Relaxed);
        self.transient
            .store(f.transient.to_bits(), Ordering::Relaxed);
        self.rhythm.store(f.rhythm.to_bits(), Ordering::Relaxed);
        self.peak.store(f.peak.to_bits(), Ordering::Relaxed);
        self.smooth.store(f.smooth.to_bits(), Ordering::Relaxed);
        self.updated_ms.store(now_ms(), Ordering::Relaxed);
        self.seq.fetch_add(1, Ordering::Release); // even => stable
    }

    pub fn load(&self) -> AudioFeatures {
        loop {
            let v1 = self.seq.load(Ordering::Acquire);
            if v1 & 1 == 1 {
                continue;
            }
            let out = AudioFeatures {
                bass: f32::from_bits(self.bass.load(Ordering::Relaxed)),
                mid: f32::from_bits(self.mid.load(Ordering::Relaxed)),
                high: f32::from_bits(self.high.load(Ordering::Relaxed)),
                energy: f32::from_bits(self.energy.load(Ordering::Relaxed)),
                transient: f32::from_bits(self.transient.load(Ordering::Relaxed)),
                rhythm: f32::from_bits(self.rhythm.load(Ordering::Relaxed)),
                peak: f32::from_bits(self.peak.load(Ordering::Relaxed)),
                smooth: f32::from_bits(self.smooth.load(Ordering::Relaxed)),
            };
            let v2 = self.seq.load(Ordering::Acquire);
            if v1 == v2 {
                return out;
            }
        }
    }

    pub fn age_ms(&self) -> f32 {
        let t = self.updated_ms.load(Ordering::Relaxed);
        if t == 0 {
            return f32::INFINITY;
        }
        now_ms().saturating_sub(t) as f32
    }
}

impl Default for AtomicAudioFeatures {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_millis(0))
        .as_millis() as u64
}

/// Pure spectral feature extractor. Push PCM in, get one `AudioFeatures`
/// out per hop once the window has filled. No threads and no device state,
/// so the full pipeline runs on synthetic signals in tests.
pub struct FeatureExtractor {
    sample_rate_hz: u32,
    scratch: Vec<f32>,
    write_pos: usize,
    filled: usize,
    since_last: usize,
    hop: usize,
    hann: Vec<f32>,
    fft: Arc<dyn rustfft::Fft<f32>>,
    fft_buf: Vec<Complex<f32>>,
    smoothed_mags: Vec<f32>,
    energy_history: Vec<f32>,
    prev_energy: f32,
    smooth: f32,
}

impl FeatureExtractor {
    pub fn new(sample_rate_hz: u32) -> Self {
        let n = FFT_SIZE;
        let hann = (0..n)
            .map(|i| 0.5 - 0.5 * ((2.0 * PI * i as f32) / (n as f32)).cos())
            .collect::<Vec<_>>();
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        Self {
            sample_rate_hz,
            scratch: vec![0.0; n],
            write_pos: 0,
            filled: 0,
            since_last: 0,
            hop: n / 2,
            hann,
            fft,
            fft_buf: vec![Complex { re: 0.0, im: 0.0 }; n],
            smoothed_mags: vec![0.0; n / 2],
            energy_history: Vec::with_capacity(ENERGY_HISTORY),
            prev_energy: 0.0,
            smooth: 0.0,
        }
    }

    /// Feed mono samples; returns the latest feature frame completed while
    /// consuming them, if any.
    pub fn push_samples(&mut self, samples: &[f32]) -> Option<AudioFeatures> {
        let n = self.scratch.len();
        let mut latest = None;
        for &s in samples {
            self.scratch[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % n;
            if self.filled < n {
                self.filled += 1;
            }
            self.since_last += 1;
            if self.filled == n && self.since_last >= self.hop {
                self.since_last = 0;
                latest = Some(self.analyze_window());
            }
        }
        latest
    }

    fn analyze_window(&mut self) -> AudioFeatures {
        let n = self.fft_buf.len();
        let half = n / 2;
        for i in 0..n {
            let s = self.scratch[(self.write_pos + i) % n];
            self.fft_buf[i].re = s * self.hann[i];
            self.fft_buf[i].im = 0.0;
        }
        self.fft.process(&mut self.fft_buf);

        // Analyser-style magnitude smoothing before any feature reads.
        for i in 0..half {
            let c = self.fft_buf[i];
            let mag = (c.re * c.re + c.im * c.im).sqrt();
            self.smoothed_mags[i] = SMOOTHING * self.smoothed_mags[i] + (1.0 - SMOOTHING) * mag;
        }

        let sr = self.sample_rate_hz as f32;
        let bass = self.band_mean(20.0, 250.0, sr);
        let mid = self.band_mean(250.0, 2000.0, sr);
        let high = self.band_mean(2000.0, 20000.0, sr);

        let mut sum = 0.0f32;
        for &m in &self.smoothed_mags[1..] {
            sum += m;
        }
        // Log-ish compression into [0,1). The whole-spectrum mean sits far
        // below a band mean, so it gets a hotter scale than the bands.
        let energy = (sum / (half - 1) as f32 * 0.5).tanh();

        let transient = ((energy - self.prev_energy).max(0.0) * 10.0).min(1.0);
        self.prev_energy = energy;

        if self.energy_history.len() == ENERGY_HISTORY {
            self.energy_history.remove(0);
        }
        self.energy_history.push(energy);
        let rhythm = rhythm_estimate(&self.energy_history);

        self.smooth = self.smooth * 0.9 + energy * 0.1;

        AudioFeatures {
            bass,
            mid,
            high,
            energy,
            transient,
            rhythm,
            peak: bass.max(mid).max(high),
            smooth: self.smooth,
        }
    }

    fn band_mean(&self, lo_hz: f32, hi_hz: f32, sr: f32) -> f32 {
        let n = self.fft_buf.len() as f32;
        let half = self.smoothed_mags.len();
        let mut acc = 0.0f32;
        let mut count = 0u32;
        for i in 1..half {
            let f = i as f32 * sr / n;
            if f < lo_hz {
                continue;
            }
            if f > hi_hz {
                break;
            }
            acc += self.smoothed_mags[i];
            count += 1;
        }
        if count == 0 {
            return 0.0;
        }
        (acc / count as f32 * 0.05).tanh()
    }
}

/// Windowed autocorrelation of the energy history: best correlation over
/// lags `1..=RHYTHM_WINDOW`, scaled by 2 and clamped to `[0,1]`.
pub fn rhythm_estimate(history: &[f32]) -> f32 {
    let n = history.len();
    if n < RHYTHM_WINDOW * 2 {
        return 0.0;
    }
    let mut best = 0.0f32;
    for lag in 1..=RHYTHM_WINDOW {
        let mut acc = 0.0f32;
        for i in 0..RHYTHM_WINDOW {
            acc += history[n - 1 - i] * history[n - 1 - i - lag];
        }
        best = best.max(acc / RHYTHM_WINDOW as f32);
    }
    (best * 2.0).clamp(0.0, 1.0)
}

/// One row of `--list-devices` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub name: String,
    pub is_default: bool,
}

/// Enumerate capture devices, flagging the host default. Nameless devices
/// are skipped; they cannot be selected with `--device` anyway.
pub fn input_devices() -> Result<Vec<DeviceEntry>, AudioError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Backend(e.to_string()))?;

    let mut entries = Vec::new();
    for device in devices {
        let Ok(name) = device.name() else {
            continue;
        };
        let is_default = default_name.as_deref() == Some(name.as_str());
        entries.push(DeviceEntry { name, is_default });
    }
    Ok(entries)
}

pub fn list_input_devices() -> anyhow::Result<()> {
    let entries = input_devices()?;
    let mut out = io::stdout();
    if entries.is_empty() {
        writeln!(out, "no capture devices available")?;
        return Ok(());
    }
    for entry in entries {
        let marker = if entry.is_default { '*' } else { ' ' };
        writeln!(out, "{marker} {}", entry.name)?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    /// Input access refused. The audio-reactive channel stays dark and the
    /// rest of the host keeps working.
    PermissionDenied,
    NoDevice(String),
    Backend(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "audio input permission denied"),
            Self::NoDevice(q) => write!(f, "no input device matching: {q}"),
            Self::Backend(msg) => write!(f, "audio backend error: {msg}"),
        }
    }
}

impl std::error::Error for AudioError {}

/// Owns the capture stream and the analyzer thread; publishes features
/// through the seqlock cell.
pub struct AudioSystem {
    _stream: cpal::Stream,
    stop: Arc<AtomicBool>,
    analyzer_handle: Option<thread::JoinHandle<()>>,
    features: Arc<AtomicAudioFeatures>,
    pub sample_rate_hz: u32,
}

impl AudioSystem {
    pub fn new(device_query: Option<&str>) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = pick_capture_device(&host, device_query)?;
        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::Backend(e.to_string()))?;
        let sample_rate_hz = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let config: cpal::StreamConfig = supported.clone().into();

        let rb_capacity = (sample_rate_hz as usize).saturating_mul(4);
        let rb = HeapRb::<f32>::new(rb_capacity);
        let (mut prod, mut cons) = rb.split();

        let stop = Arc::new(AtomicBool::new(false));
        let features = Arc::new(AtomicAudioFeatures::new());
        let features_for_thread = Arc::clone(&features);
        let stop_for_thread = Arc::clone(&stop);

        let err_fn = |err| eprintln!("audio stream error: {err}");

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _| push_interleaved(data, channels, &mut prod),
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _| push_interleaved(data, channels, &mut prod),
                err_fn,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _| push_interleaved(data, channels, &mut prod),
                err_fn,
                None,
            ),
            fmt => {
                return Err(AudioError::Backend(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(map_build_error)?;

        stream
            .play()
            .map_err(|e| AudioError::Backend(e.to_string()))?;

        let analyzer_handle = thread::spawn(move || {
            let mut extractor = FeatureExtractor::new(sample_rate_hz);
            let mut chunk = [0.0f32; 1024];
            while !stop_for_thread.load(Ordering::Relaxed) {
                let mut got_any = false;
                loop {
                    let mut len = 0;
                    while len < chunk.len() {
                        match cons.try_pop() {
                            Some(s) => {
                                chunk[len] = s;
                                len += 1;
                            }
                            None => break,
                        }
                    }
                    if len == 0 {
                        break;
                    }
                    got_any = true;
                    if let Some(f) = extractor.push_samples(&chunk[..len]) {
                        features_for_thread.store(f);
                    }
                }
                if !got_any {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        });

        Ok(Self {
            _stream: stream,
            stop,
            analyzer_handle: Some(analyzer_handle),
            features,
            sample_rate_hz,
        })
    }

    pub fn features(&self) -> Arc<AtomicAudioFeatures> {
        Arc::clone(&self.features)
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.analyzer_handle.take() {
            let _ = h.join();
        }
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> AudioError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => AudioError::PermissionDenied,
        other => AudioError::Backend(other.to_string()),
    }
}

/// Pick the capture device. Without a query this is simply the host
/// default. With one, an exact case-insensitive name match wins over the
/// first substring match, and a miss reports the names that were available
/// so the user can correct the query without re-running `--list-devices`.
fn pick_capture_device(
    host: &cpal::Host,
    query: Option<&str>,
) -> Result<cpal::Device, AudioError> {
    let Some(query) = query else {
        return host
            .default_input_device()
            .ok_or(AudioError::PermissionDenied);
    };

    let needle = query.to_lowercase();
    let mut partial: Option<cpal::Device> = None;
    let mut seen = Vec::new();
    for device in host
        .input_devices()
        .map_err(|e| AudioError::Backend(e.to_string()))?
    {
        let Ok(name) = device.name() else {
            continue;
        };
        let lowered = name.to_lowercase();
        if lowered == needle {
            return Ok(device);
        }
        if partial.is_none() && lowered.contains(&needle) {
            partial = Some(device);
        }
        seen.push(name);
    }

    partial.ok_or_else(|| {
        if seen.is_empty() {
            AudioError::NoDevice(query.to_string())
        } else {
            AudioError::NoDevice(format!("{query} (available: {})", seen.join(", ")))
        }
    })
}

fn push_interleaved<T: Sample<Float = f32> + Copy>(
    data: &[T],
    channels: usize,
    prod: &mut ringbuf::HeapProd<f32>,
) {
    for frame in data.chunks(channels.max(1)) {
        let mut acc = 0.0f32;
        for s in frame {
            acc += (*s).to_float_sample();
        }
        let mono = acc / channels.max(1) as f32;
        let _ = prod.try_push(mono);
    }
}

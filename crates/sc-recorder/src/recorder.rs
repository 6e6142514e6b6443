//! The recording session facade.
//!
//! Owns every subcomponent by composition and routes the caller-facing
//! operations: `encode_frame` to the video encoder, `write_audio` to the
//! audio encoder, sample bytes to the writer pump, and `finalize` through
//! the full drain sequence (video, audio, pump, muxer).
//!
//! Failures follow one discipline: the observing call stores a
//! human-readable string in `last_error`, returns `false`, and the session
//! makes no recovery attempt. `create` itself never fails — construction
//! errors are deferred to `last_error` so the caller always gets a handle
//! to interrogate.

use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use sc_audio::{AacPacket, AudioEncoder, TransformFactory, TransformSpec};
use sc_common::{GpuContext, InputSurface, SessionConfig, VideoBackend, VideoCodec};
use sc_encoder::{NvencLibrary, VideoEncoder};
use sc_mux::annexb::{self, NalUnit};
use sc_mux::{codec_config, AudioTrackParams, Mp4Muxer, MuxerConfig};

use crate::diag::DiagnosticLog;
use crate::writer::{WriterMessage, WriterPump};

/// One recording session: create, feed, finalize.
pub struct Recorder {
    config: SessionConfig,
    video: Option<Box<dyn VideoBackend>>,
    audio: Option<AudioEncoder>,
    transform_factory: TransformFactory,
    muxer: Arc<Mutex<Mp4Muxer>>,
    pump: Option<WriterPump>,
    diag: DiagnosticLog,
    last_error: Option<String>,
    finalized: bool,
    /// Video samples dropped because no parameter sets had been seen yet.
    dropped_preheader: u64,
}

impl Recorder {
    /// Create a session over the NVENC hardware encoder.
    ///
    /// Never fails: initialization errors are stored in
    /// [`Recorder::last_error`] and every subsequent operation reports
    /// failure.
    pub fn create(gpu: Box<dyn GpuContext>, config: SessionConfig) -> Self {
        let mut recorder = Self::shell(config);
        recorder.diag.line("session create");

        if let Err(e) = recorder.config.validate() {
            recorder.set_error(e.to_string());
            return recorder;
        }

        let config = recorder.config.clone();
        match NvencLibrary::load() {
            Ok(lib) => match VideoEncoder::new(Arc::new(lib), gpu, &config) {
                Ok(encoder) => recorder.video = Some(Box::new(encoder)),
                Err(e) => recorder.set_error(e.to_string()),
            },
            Err(e) => recorder.set_error(e.to_string()),
        }
        recorder
    }

    /// Create a session over an explicit video backend (tests, software
    /// fallback experiments).
    pub fn with_backend(backend: Box<dyn VideoBackend>, config: SessionConfig) -> Self {
        let mut recorder = Self::shell(config);
        if let Err(e) = recorder.config.validate() {
            recorder.set_error(e.to_string());
            return recorder;
        }
        recorder.video = Some(backend);
        recorder
    }

    /// Replace the AAC transform factory (tests inject a mock here).
    pub fn with_transform_factory(mut self, factory: TransformFactory) -> Self {
        self.transform_factory = factory;
        self
    }

    fn shell(config: SessionConfig) -> Self {
        let muxer = Arc::new(Mutex::new(Mp4Muxer::new(
            config.codec,
            MuxerConfig {
                width: config.resolution.width,
                height: config.resolution.height,
                fps: config.fps,
                output_path: config.output_path.clone(),
            },
        )));
        let pump = WriterPump::spawn(muxer.clone());
        let diag = DiagnosticLog::open(&config.output_path);

        info!(
            output = %config.output_path.display(),
            codec = config.codec.display_name(),
            size = %config.resolution,
            fps = config.fps,
            "Recording session created"
        );

        Self {
            config,
            video: None,
            audio: None,
            transform_factory: Box::new(|spec| sc_audio::create_system_transform(spec)),
            muxer,
            pump: Some(pump),
            diag,
            last_error: None,
            finalized: false,
            dropped_preheader: 0,
        }
    }

    /// The stored error message, stable until the next mutating call.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn set_error(&mut self, message: String) {
        error!(error = %message, "Session error");
        self.diag.line(&message);
        self.last_error = Some(message);
    }

    /// Encode one GPU surface.
    pub fn encode_frame(&mut self, surface: &InputSurface) -> bool {
        if self.finalized {
            self.set_error("Session already finalized.".to_string());
            return false;
        }
        if self.video.is_none() {
            self.set_error("Video encoder not initialized.".to_string());
            return false;
        }

        let result = self
            .video
            .as_mut()
            .expect("checked above")
            .submit(surface);
        match result {
            Ok(buffers) => {
                for buffer in buffers {
                    if !self.process_video_buffer(&buffer) {
                        return false;
                    }
                }
                true
            }
            Err(e) => {
                // Fatal: the session closes with the encoder.
                self.video = None;
                self.set_error(e.to_string());
                false
            }
        }
    }

    /// One complete Annex-B picture from the encoder: scan it, open the
    /// muxer on the first codec record, and queue the length-prefixed
    /// sample.
    fn process_video_buffer(&mut self, annexb_data: &[u8]) -> bool {
        let codec = self.config.codec;
        let units = annexb::parse_annex_b(annexb_data, codec);
        if units.is_empty() {
            return true;
        }
        let keyframe = units
            .iter()
            .any(|u| annexb::is_keyframe(codec, u.nal_type));

        // Open the muxer once a configuration record can be built.
        enum Gate {
            Ready,
            Dropped,
            Failed(String),
        }
        let gate = {
            let mut muxer = self.muxer.lock().expect("file mutex poisoned");
            if muxer.is_open() {
                Gate::Ready
            } else {
                match sniff_codec_record(codec, &units) {
                    Some(record) => match muxer.initialize(record) {
                        Ok(()) => Gate::Ready,
                        Err(e) => Gate::Failed(e.to_string()),
                    },
                    None => Gate::Dropped,
                }
            }
        };
        match gate {
            Gate::Ready => {}
            Gate::Dropped => {
                // No parameter sets yet: the sample cannot be decoded, so
                // it is dropped rather than written ahead of the header.
                self.dropped_preheader += 1;
                warn!(
                    dropped = self.dropped_preheader,
                    "Dropping video sample before codec header"
                );
                return true;
            }
            Gate::Failed(message) => {
                self.set_error(message);
                return false;
            }
        }

        let sample = annexb::to_length_prefixed(&units, codec, false);
        if sample.is_empty() {
            return true;
        }

        debug!(bytes = sample.len(), keyframe, "Video sample queued");
        self.enqueue(WriterMessage::Video {
            data: sample,
            keyframe,
        })
    }

    /// Feed interleaved float PCM. An empty slice is a successful no-op.
    pub fn write_audio(&mut self, samples: &[f32], sample_rate: u32, channels: u16) -> bool {
        if samples.is_empty() {
            return true;
        }
        if self.finalized {
            self.set_error("Session already finalized.".to_string());
            return false;
        }

        if let Some(audio) = &self.audio {
            if !audio.matches_format(sample_rate, channels) {
                self.set_error(sc_audio::AudioError::FormatMismatch.to_string());
                return false;
            }
        } else {
            if sample_rate == 0 || channels == 0 {
                self.set_error("Audio encoder initialization failed: zero rate or channels".to_string());
                return false;
            }
            let spec = TransformSpec {
                sample_rate,
                channels,
                bitrate: sc_audio::encoder::DEFAULT_BITRATE,
            };
            match (self.transform_factory)(&spec) {
                Ok(transform) => {
                    let encoder = AudioEncoder::with_transform(sample_rate, channels, transform);
                    self.muxer
                        .lock()
                        .expect("file mutex poisoned")
                        .set_audio_track(AudioTrackParams {
                            sample_rate,
                            channels,
                            bitrate: spec.bitrate,
                            audio_specific_config: encoder.audio_specific_config().to_vec(),
                        });
                    self.audio = Some(encoder);
                }
                Err(e) => {
                    self.set_error(e.to_string());
                    return false;
                }
            }
        }

        let result = self.audio.as_mut().expect("initialized above").write(samples);
        match result {
            Ok(packets) => self.enqueue_audio(packets),
            Err(e) => {
                self.set_error(e.to_string());
                false
            }
        }
    }

    fn enqueue_audio(&mut self, packets: Vec<AacPacket>) -> bool {
        for packet in packets {
            if !self.enqueue(WriterMessage::Audio {
                data: packet.data,
                duration: packet.duration,
            }) {
                return false;
            }
        }
        true
    }

    fn enqueue(&mut self, message: WriterMessage) -> bool {
        let result = match &self.pump {
            Some(pump) => pump.enqueue(message),
            None => {
                self.set_error("Writer thread is not running".to_string());
                return false;
            }
        };
        if let Err(e) = result {
            self.set_error(e.to_string());
            return false;
        }
        true
    }

    /// Drain both encoders, stop the writer, and close the MP4.
    pub fn finalize(&mut self) -> bool {
        if self.finalized {
            return self.last_error.is_none();
        }
        self.diag.line("finalize");
        let mut ok = true;

        // Video first so trailing pictures land before the audio tail.
        if let Some(mut video) = self.video.take() {
            match video.drain() {
                Ok(buffers) => {
                    for buffer in buffers {
                        if !self.process_video_buffer(&buffer) {
                            ok = false;
                            break;
                        }
                    }
                }
                Err(e) => {
                    self.set_error(e.to_string());
                    ok = false;
                }
            }
        }

        if let Some(mut audio) = self.audio.take() {
            match audio.finish() {
                Ok(packets) => {
                    if !self.enqueue_audio(packets) {
                        ok = false;
                    }
                }
                Err(e) => {
                    self.set_error(e.to_string());
                    ok = false;
                }
            }
        }

        if let Some(mut pump) = self.pump.take() {
            pump.stop();
            if let Some(failure) = pump.take_failure() {
                self.set_error(failure);
                ok = false;
            }
        }

        let result = self.muxer.lock().expect("file mutex poisoned").finalize();
        if let Err(e) = result {
            self.set_error(e.to_string());
            ok = false;
        }

        self.finalized = true;
        if ok {
            self.diag.line("finalize complete");
            info!("Recording finalized");
        }
        ok
    }

    /// Idempotent teardown; finalizes on a best-effort basis so a
    /// crash-adjacent shutdown still produces a playable file.
    pub fn close(&mut self) {
        if !self.finalized {
            debug!("Closing session without explicit finalize");
            let _ = self.finalize();
        }
        self.video = None;
        self.audio = None;
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pick the parameter sets out of one picture's NAL units and build the
/// codec configuration record, if the picture carries enough of them.
fn sniff_codec_record(codec: VideoCodec, units: &[NalUnit<'_>]) -> Option<Vec<u8>> {
    let first_of = |nal_type: u8| {
        units
            .iter()
            .find(|u| u.nal_type == nal_type)
            .map(|u| u.data)
    };
    match codec {
        VideoCodec::H264 => {
            let sps = first_of(7)?;
            let pps = first_of(8)?;
            codec_config::build_avcc(sps, pps)
        }
        VideoCodec::Hevc => {
            let sps = first_of(33)?;
            codec_config::build_hvcc(
                first_of(32).unwrap_or(&[]),
                sps,
                first_of(34).unwrap_or(&[]),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_audio::{AacTransform, AudioError, PullOutcome, PushOutcome};
    use sc_common::{
        EncodeError, PixelFormat, Quality, RateControl, Resolution, SessionState, TextureHandle,
    };
    use std::collections::VecDeque;
    use std::path::PathBuf;

    // -- Bitstream synthesis helpers --

    fn h264_nal(nal_type: u8) -> Vec<u8> {
        match nal_type {
            7 => vec![0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9],
            8 => vec![0x68, 0xEB, 0xE3, 0xCB],
            5 => vec![0x65, 0x88, 0x84, 0x00, 0x10],
            _ => vec![0x41, 0x9A, 0x02],
        }
    }

    fn hevc_nal(nal_type: u8) -> Vec<u8> {
        let mut nal = vec![nal_type << 1, 0x01];
        nal.extend_from_slice(&[0x20, 0x30, 0x40]);
        nal
    }

    fn annexb(codec: VideoCodec, types: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for &t in types {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(&match codec {
                VideoCodec::H264 => h264_nal(t),
                VideoCodec::Hevc => hevc_nal(t),
            });
        }
        out
    }

    // -- Mock seams --

    struct MockVideoBackend {
        per_submit: VecDeque<Vec<Vec<u8>>>,
        drain_output: Vec<Vec<u8>>,
        state: SessionState,
    }

    impl MockVideoBackend {
        fn new(per_submit: Vec<Vec<Vec<u8>>>, drain_output: Vec<Vec<u8>>) -> Self {
            Self {
                per_submit: per_submit.into(),
                drain_output,
                state: SessionState::Ready,
            }
        }
    }

    impl VideoBackend for MockVideoBackend {
        fn submit(&mut self, _surface: &InputSurface) -> Result<Vec<Vec<u8>>, EncodeError> {
            self.state = SessionState::Running;
            Ok(self.per_submit.pop_front().unwrap_or_default())
        }

        fn drain(&mut self) -> Result<Vec<Vec<u8>>, EncodeError> {
            self.state = SessionState::Draining;
            Ok(std::mem::take(&mut self.drain_output))
        }

        fn state(&self) -> SessionState {
            self.state
        }
    }

    /// One canned AAC access unit per pushed frame.
    struct MockAacTransform {
        queued: VecDeque<Vec<u8>>,
        counter: u8,
    }

    impl MockAacTransform {
        fn new() -> Self {
            Self {
                queued: VecDeque::new(),
                counter: 0,
            }
        }
    }

    impl AacTransform for MockAacTransform {
        fn push(
            &mut self,
            _pcm: &[i16],
            _timestamp: i64,
            _duration: i64,
        ) -> Result<PushOutcome, AudioError> {
            self.counter = self.counter.wrapping_add(1);
            self.queued.push_back(vec![self.counter; 48]);
            Ok(PushOutcome::Accepted)
        }

        fn pull(&mut self) -> Result<PullOutcome, AudioError> {
            match self.queued.pop_front() {
                Some(frame) => Ok(PullOutcome::Frame(frame)),
                None => Ok(PullOutcome::NeedMoreInput),
            }
        }

        fn begin_drain(&mut self) -> Result<(), AudioError> {
            Ok(())
        }
    }

    fn mock_transform_factory() -> TransformFactory {
        Box::new(|_spec| Ok(Box::new(MockAacTransform::new()) as Box<dyn AacTransform>))
    }

    // -- Session helpers --

    fn temp_output(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("sc_recorder_test_{name}.mp4"));
        std::fs::remove_file(&path).ok();
        path
    }

    fn cleanup(path: &PathBuf) {
        std::fs::remove_file(path).ok();
        let mut log = path.as_os_str().to_owned();
        log.push(".nvenc_log.txt");
        std::fs::remove_file(PathBuf::from(log)).ok();
    }

    fn make_config(codec: VideoCodec, path: &PathBuf) -> SessionConfig {
        SessionConfig {
            resolution: Resolution::new(1280, 720),
            fps: 30,
            codec,
            rate_control: RateControl::Cbr,
            bitrate: 8_000_000,
            max_bitrate: 0,
            quality: Quality::Medium,
            input_format: PixelFormat::Bgra8,
            fast_preset: false,
            hevc_async: false,
            output_path: path.clone(),
        }
    }

    fn surface() -> InputSurface {
        InputSurface {
            handle: TextureHandle(0x10),
            resolution: Resolution::new(1280, 720),
            format: PixelFormat::Bgra8,
        }
    }

    // -- File parsing helpers --

    fn find_all(buf: &[u8], fourcc: &[u8; 4]) -> Vec<usize> {
        buf.windows(4)
            .enumerate()
            .filter(|(_, w)| w == fourcc)
            .map(|(i, _)| i - 4)
            .collect()
    }

    fn find_box(buf: &[u8], fourcc: &[u8; 4]) -> Option<usize> {
        find_all(buf, fourcc).first().copied()
    }

    fn read_u32(buf: &[u8], at: usize) -> u32 {
        u32::from_be_bytes(buf[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn empty_session_reports_missing_header() {
        let path = temp_output("empty");
        let backend = MockVideoBackend::new(vec![], vec![]);
        let mut recorder =
            Recorder::with_backend(Box::new(backend), make_config(VideoCodec::H264, &path));

        assert!(!recorder.finalize());
        assert_eq!(recorder.last_error(), Some("Video codec header not found."));
        assert!(!path.exists());
        cleanup(&path);
    }

    #[test]
    fn single_idr_h264_file_layout() {
        let path = temp_output("single_idr");
        let idr_len = h264_nal(5).len();
        let backend = MockVideoBackend::new(
            vec![vec![annexb(VideoCodec::H264, &[7, 8, 5])]],
            vec![],
        );
        let mut recorder =
            Recorder::with_backend(Box::new(backend), make_config(VideoCodec::H264, &path));

        assert!(recorder.encode_frame(&surface()));
        assert!(recorder.finalize());
        assert!(recorder.last_error().is_none());

        let data = std::fs::read(&path).unwrap();

        // ftyp is 32 bytes, mdat header 16 bytes.
        assert_eq!(read_u32(&data, 0), 32);
        assert_eq!(&data[4..8], b"ftyp");
        assert_eq!(read_u32(&data, 32), 1);
        assert_eq!(&data[36..40], b"mdat");

        // One sample: parameter sets dropped, IDR length-prefixed.
        let sample_len = (4 + idr_len) as u64;
        let largesize = u64::from_be_bytes(data[40..48].try_into().unwrap());
        assert_eq!(largesize, 16 + sample_len);

        // stts = {(1, 3000)}.
        let stts = find_box(&data, b"stts").unwrap();
        assert_eq!(read_u32(&data, stts + 12), 1);
        assert_eq!(read_u32(&data, stts + 16), 1);
        assert_eq!(read_u32(&data, stts + 20), 3000);

        // stsz = [sample_len].
        let stsz = find_box(&data, b"stsz").unwrap();
        assert_eq!(read_u32(&data, stsz + 16), 1);
        assert_eq!(read_u32(&data, stsz + 20) as u64, sample_len);

        // stco = [48] (the mdat data offset).
        let stco = find_box(&data, b"stco").unwrap();
        assert_eq!(read_u32(&data, stco + 12), 1);
        assert_eq!(read_u32(&data, stco + 16), 48);

        // stss = [1].
        let stss = find_box(&data, b"stss").unwrap();
        assert_eq!(read_u32(&data, stss + 12), 1);
        assert_eq!(read_u32(&data, stss + 16), 1);

        // No audio track; next_track_id = 2.
        assert!(find_box(&data, b"soun").is_none());
        let mvhd = find_box(&data, b"mvhd").unwrap();
        assert_eq!(read_u32(&data, mvhd + 104), 2);

        cleanup(&path);
    }

    #[test]
    fn thirty_frames_with_audio() {
        let path = temp_output("av");
        let mut submissions = vec![vec![annexb(VideoCodec::H264, &[7, 8, 5])]];
        for _ in 1..30 {
            submissions.push(vec![annexb(VideoCodec::H264, &[1])]);
        }
        let backend = MockVideoBackend::new(submissions, vec![]);
        let mut recorder =
            Recorder::with_backend(Box::new(backend), make_config(VideoCodec::H264, &path))
                .with_transform_factory(mock_transform_factory());

        for _ in 0..30 {
            assert!(recorder.encode_frame(&surface()));
        }
        // One second of 48 kHz stereo float pairs.
        assert!(recorder.write_audio(&vec![0.1f32; 96_000], 48_000, 2));
        assert!(recorder.finalize());

        let data = std::fs::read(&path).unwrap();

        // Video: 30 samples of 3000 ticks; audio: ceil(48000/1024) = 47
        // access units, 48128 samples = 90240 movie ticks.
        let mvhd = find_box(&data, b"mvhd").unwrap();
        assert_eq!(read_u32(&data, mvhd + 24), 90_240);
        assert_eq!(read_u32(&data, mvhd + 104), 3);

        let stts_boxes = find_all(&data, b"stts");
        assert_eq!(stts_boxes.len(), 2);
        // Video stts: (30, 3000).
        assert_eq!(read_u32(&data, stts_boxes[0] + 16), 30);
        assert_eq!(read_u32(&data, stts_boxes[0] + 20), 3000);
        // Audio stts: single run (47, 1024).
        assert_eq!(read_u32(&data, stts_boxes[1] + 12), 1);
        assert_eq!(read_u32(&data, stts_boxes[1] + 16), 47);
        assert_eq!(read_u32(&data, stts_boxes[1] + 20), 1024);

        // One keyframe at sample 1.
        let stss = find_box(&data, b"stss").unwrap();
        assert_eq!(read_u32(&data, stss + 12), 1);
        assert_eq!(read_u32(&data, stss + 16), 1);

        // Audio mdhd: timescale 48000, duration 48128.
        let mdhd_boxes = find_all(&data, b"mdhd");
        assert_eq!(mdhd_boxes.len(), 2);
        assert_eq!(read_u32(&data, mdhd_boxes[1] + 20), 48_000);
        assert_eq!(read_u32(&data, mdhd_boxes[1] + 24), 48_128);

        cleanup(&path);
    }

    #[test]
    fn hevc_keyframe_detection() {
        let path = temp_output("hevc");
        let submissions = vec![
            vec![annexb(VideoCodec::Hevc, &[32, 33, 34, 19])],
            vec![annexb(VideoCodec::Hevc, &[1])],
            vec![annexb(VideoCodec::Hevc, &[1])],
            vec![annexb(VideoCodec::Hevc, &[1])],
            vec![annexb(VideoCodec::Hevc, &[20])],
        ];
        let backend = MockVideoBackend::new(submissions, vec![]);
        let mut recorder =
            Recorder::with_backend(Box::new(backend), make_config(VideoCodec::Hevc, &path));

        for _ in 0..5 {
            assert!(recorder.encode_frame(&surface()));
        }
        assert!(recorder.finalize());

        let data = std::fs::read(&path).unwrap();
        assert!(find_box(&data, b"hvc1").is_some());
        assert!(find_box(&data, b"hvcC").is_some());

        // syncSamples == [1, 5].
        let stss = find_box(&data, b"stss").unwrap();
        assert_eq!(read_u32(&data, stss + 12), 2);
        assert_eq!(read_u32(&data, stss + 16), 1);
        assert_eq!(read_u32(&data, stss + 20), 5);

        cleanup(&path);
    }

    #[test]
    fn audio_format_mismatch() {
        let path = temp_output("mismatch");
        let backend = MockVideoBackend::new(
            vec![vec![annexb(VideoCodec::H264, &[7, 8, 5])]],
            vec![],
        );
        let mut recorder =
            Recorder::with_backend(Box::new(backend), make_config(VideoCodec::H264, &path))
                .with_transform_factory(mock_transform_factory());

        assert!(recorder.write_audio(&vec![0.0f32; 2048], 48_000, 2));
        assert!(!recorder.write_audio(&vec![0.0f32; 2048], 44_100, 2));
        assert_eq!(recorder.last_error(), Some("Audio format mismatch."));
        cleanup(&path);
    }

    #[test]
    fn empty_audio_write_is_noop() {
        let path = temp_output("empty_audio");
        let backend = MockVideoBackend::new(vec![], vec![]);
        let mut recorder =
            Recorder::with_backend(Box::new(backend), make_config(VideoCodec::H264, &path));

        // No transform factory invoked, no error recorded.
        assert!(recorder.write_audio(&[], 48_000, 2));
        assert!(recorder.last_error().is_none());
        cleanup(&path);
    }

    #[test]
    fn preheader_samples_are_dropped() {
        let path = temp_output("preheader");
        let submissions = vec![
            // No parameter sets in the first picture: dropped.
            vec![annexb(VideoCodec::H264, &[1])],
            vec![annexb(VideoCodec::H264, &[7, 8, 5])],
            vec![annexb(VideoCodec::H264, &[1])],
        ];
        let backend = MockVideoBackend::new(submissions, vec![]);
        let mut recorder =
            Recorder::with_backend(Box::new(backend), make_config(VideoCodec::H264, &path));

        assert!(recorder.encode_frame(&surface()));
        assert!(recorder.encode_frame(&surface()));
        assert!(recorder.encode_frame(&surface()));
        assert_eq!(recorder.dropped_preheader, 1);
        assert!(recorder.finalize());

        // Only the two post-header pictures are in the table.
        let data = std::fs::read(&path).unwrap();
        let stsz = find_box(&data, b"stsz").unwrap();
        assert_eq!(read_u32(&data, stsz + 16), 2);
        cleanup(&path);
    }

    #[test]
    fn audio_before_video_is_kept() {
        let path = temp_output("audio_first");
        let backend = MockVideoBackend::new(
            vec![vec![annexb(VideoCodec::H264, &[7, 8, 5])]],
            vec![],
        );
        let mut recorder =
            Recorder::with_backend(Box::new(backend), make_config(VideoCodec::H264, &path))
                .with_transform_factory(mock_transform_factory());

        // Two full audio frames arrive before any video.
        assert!(recorder.write_audio(&vec![0.0f32; 4096], 48_000, 2));
        assert!(recorder.encode_frame(&surface()));
        assert!(recorder.finalize());

        let data = std::fs::read(&path).unwrap();
        let stsz_boxes = find_all(&data, b"stsz");
        assert_eq!(stsz_boxes.len(), 2);
        // Audio stsz holds both buffered access units.
        assert_eq!(read_u32(&data, stsz_boxes[1] + 16), 2);
        cleanup(&path);
    }

    #[test]
    fn drain_output_is_written() {
        let path = temp_output("drain");
        let backend = MockVideoBackend::new(
            vec![vec![annexb(VideoCodec::H264, &[7, 8, 5])]],
            vec![
                annexb(VideoCodec::H264, &[1]),
                annexb(VideoCodec::H264, &[1]),
            ],
        );
        let mut recorder =
            Recorder::with_backend(Box::new(backend), make_config(VideoCodec::H264, &path));

        assert!(recorder.encode_frame(&surface()));
        assert!(recorder.finalize());

        let data = std::fs::read(&path).unwrap();
        let stsz = find_box(&data, b"stsz").unwrap();
        assert_eq!(read_u32(&data, stsz + 16), 3);
        cleanup(&path);
    }

    #[test]
    fn finalize_is_idempotent() {
        let path = temp_output("refinal");
        let backend = MockVideoBackend::new(
            vec![vec![annexb(VideoCodec::H264, &[7, 8, 5])]],
            vec![],
        );
        let mut recorder =
            Recorder::with_backend(Box::new(backend), make_config(VideoCodec::H264, &path));
        assert!(recorder.encode_frame(&surface()));
        assert!(recorder.finalize());
        assert!(recorder.finalize());
        cleanup(&path);
    }

    #[test]
    fn close_finalizes_best_effort() {
        let path = temp_output("close");
        let backend = MockVideoBackend::new(
            vec![vec![annexb(VideoCodec::H264, &[7, 8, 5])]],
            vec![],
        );
        let mut recorder =
            Recorder::with_backend(Box::new(backend), make_config(VideoCodec::H264, &path));
        assert!(recorder.encode_frame(&surface()));
        drop(recorder);

        // Dropping without finalize still produced a complete file.
        let data = std::fs::read(&path).unwrap();
        assert!(find_box(&data, b"moov").is_some());
        cleanup(&path);
    }

    #[test]
    fn invalid_config_defers_error() {
        let path = temp_output("invalid");
        let mut config = make_config(VideoCodec::H264, &path);
        config.fps = 0;
        let backend = MockVideoBackend::new(vec![], vec![]);
        let mut recorder = Recorder::with_backend(Box::new(backend), config);

        assert!(recorder.last_error().is_some());
        assert!(!recorder.encode_frame(&surface()));
        cleanup(&path);
    }

    #[test]
    fn diagnostic_log_is_written() {
        let path = temp_output("diag");
        let backend = MockVideoBackend::new(vec![], vec![]);
        let mut recorder =
            Recorder::with_backend(Box::new(backend), make_config(VideoCodec::H264, &path));
        recorder.finalize();

        let mut log = path.as_os_str().to_owned();
        log.push(".nvenc_log.txt");
        let contents = std::fs::read_to_string(PathBuf::from(log)).unwrap();
        assert!(contents.contains("finalize"));
        cleanup(&path);
    }
}

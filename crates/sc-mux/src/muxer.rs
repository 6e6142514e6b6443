//! The streaming MP4 muxer.
//!
//! State machine: `Unset → Open → Finalized`.
//!
//! The muxer stays `Unset` until the first video sample carrying parameter
//! sets produces a codec configuration record; only then is the file
//! created and the `ftyp` + open-ended `mdat` header written. From `Open`,
//! samples are appended forward-only while per-sample tables grow in
//! memory. `finalize` writes the `moov` index after the media data and
//! back-patches the 64-bit `mdat` size. The largesize form is used
//! unconditionally so recordings past 4 GiB need no header rewrite.

use std::path::PathBuf;

use tracing::{debug, info};

use sc_common::VideoCodec;

use crate::error::{MuxError, MuxResult};
use crate::mp4::{self, AudioTrack, VideoTrack};
use crate::sink::ByteSink;

/// Muxer lifecycle state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MuxerState {
    /// No codec configuration yet; no file on disk.
    Unset,
    /// `ftyp` and the `mdat` header are written; samples are streaming.
    Open,
    /// `moov` written, `mdat` patched, file closed.
    Finalized,
}

/// Static description of the output the muxer needs for the `moov`.
#[derive(Clone, Debug)]
pub struct MuxerConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub output_path: PathBuf,
}

/// Audio track registration, supplied once when the audio encoder starts.
#[derive(Clone, Debug)]
pub struct AudioTrackParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
    pub audio_specific_config: Vec<u8>,
}

/// Streaming single-pass MP4 writer.
///
/// Exclusively owns the [`ByteSink`] and every per-sample table. All
/// methods are called with the file mutex held; the writer pump is the
/// only caller of the append methods during normal operation.
pub struct Mp4Muxer {
    config: MuxerConfig,
    codec: VideoCodec,
    state: MuxerState,
    sink: Option<ByteSink>,

    /// `avcC`/`hvcC` payload; set exactly once.
    codec_config: Vec<u8>,

    sample_sizes: Vec<u32>,
    sample_offsets: Vec<u64>,
    sync_samples: Vec<u32>,

    audio: Option<AudioTrackParams>,
    audio_sample_sizes: Vec<u32>,
    audio_sample_offsets: Vec<u64>,
    audio_sample_durations: Vec<u32>,
    audio_sample_total: u64,
    /// Audio samples that arrived before the video header opened the file.
    pending_audio: Vec<(Vec<u8>, u32)>,

    mdat_header_offset: u64,
    mdat_largesize_offset: u64,
    mdat_data_offset: u64,
}

impl Mp4Muxer {
    pub fn new(codec: VideoCodec, config: MuxerConfig) -> Self {
        Self {
            config,
            codec,
            state: MuxerState::Unset,
            sink: None,
            codec_config: Vec::new(),
            sample_sizes: Vec::new(),
            sample_offsets: Vec::new(),
            sync_samples: Vec::new(),
            audio: None,
            audio_sample_sizes: Vec::new(),
            audio_sample_offsets: Vec::new(),
            audio_sample_durations: Vec::new(),
            audio_sample_total: 0,
            pending_audio: Vec::new(),
            mdat_header_offset: 0,
            mdat_largesize_offset: 0,
            mdat_data_offset: 0,
        }
    }

    pub fn state(&self) -> MuxerState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == MuxerState::Open
    }

    /// Register the audio track. First registration wins; the audio
    /// encoder enforces format stability upstream.
    pub fn set_audio_track(&mut self, params: AudioTrackParams) {
        if self.audio.is_none() {
            info!(
                sample_rate = params.sample_rate,
                channels = params.channels,
                "Audio track registered"
            );
            self.audio = Some(params);
        }
    }

    /// Open the file and write `ftyp` plus the open-ended `mdat` header.
    ///
    /// Called when the first codec configuration record is sniffed from the
    /// bitstream. A repeated call is a no-op.
    pub fn initialize(&mut self, codec_config: Vec<u8>) -> MuxResult<()> {
        match self.state {
            MuxerState::Open => return Ok(()),
            MuxerState::Finalized => return Err(MuxError::InvalidState("already finalized")),
            MuxerState::Unset => {}
        }
        if codec_config.is_empty() {
            return Err(MuxError::VideoHeaderMissing);
        }

        let mut sink = ByteSink::open(&self.config.output_path)?;
        Self::write_ftyp(&mut sink, self.codec)?;

        self.mdat_header_offset = sink.tell();
        // largesize form: 32-bit size = 1, then the real 64-bit size.
        sink.write(&1u32.to_be_bytes())?;
        sink.write(b"mdat")?;
        self.mdat_largesize_offset = sink.tell();
        sink.write(&0u64.to_be_bytes())?;
        self.mdat_data_offset = sink.tell();

        self.codec_config = codec_config;
        self.sink = Some(sink);
        self.state = MuxerState::Open;

        info!(
            path = %self.config.output_path.display(),
            codec = self.codec.display_name(),
            mdat_data_offset = self.mdat_data_offset,
            "MP4 writer opened"
        );

        // Flush audio that was queued while waiting for the video header.
        let pending = std::mem::take(&mut self.pending_audio);
        for (data, duration) in pending {
            self.append_audio(&data, duration)?;
        }
        Ok(())
    }

    fn write_ftyp(sink: &mut ByteSink, codec: VideoCodec) -> MuxResult<()> {
        let mut ftyp = Vec::with_capacity(32);
        ftyp.extend_from_slice(&32u32.to_be_bytes());
        ftyp.extend_from_slice(b"ftyp");
        ftyp.extend_from_slice(b"isom"); // major brand
        ftyp.extend_from_slice(&0x0000_0200u32.to_be_bytes()); // minor version
        ftyp.extend_from_slice(b"isom");
        ftyp.extend_from_slice(b"iso2");
        ftyp.extend_from_slice(codec.sample_entry());
        ftyp.extend_from_slice(b"mp41");
        sink.write(&ftyp)
    }

    /// Append one length-prefixed video sample to `mdat`.
    pub fn append_video(&mut self, data: &[u8], keyframe: bool) -> MuxResult<()> {
        if self.state != MuxerState::Open {
            return Err(MuxError::InvalidState("video sample before open"));
        }
        let sink = self.sink.as_mut().expect("sink present while open");
        let offset = sink.tell();
        sink.write(data)?;

        self.sample_offsets.push(offset);
        self.sample_sizes.push(data.len() as u32);
        if keyframe {
            self.sync_samples.push(self.sample_sizes.len() as u32);
        }
        Ok(())
    }

    /// Append one AAC access unit to `mdat`.
    ///
    /// While the muxer is `Unset` the sample is buffered and written when
    /// the video header opens the file.
    pub fn append_audio(&mut self, data: &[u8], duration: u32) -> MuxResult<()> {
        match self.state {
            MuxerState::Finalized => return Err(MuxError::InvalidState("audio after finalize")),
            MuxerState::Unset => {
                debug!(bytes = data.len(), "Buffering audio sample before video header");
                self.pending_audio.push((data.to_vec(), duration));
                return Ok(());
            }
            MuxerState::Open => {}
        }

        let sink = self.sink.as_mut().expect("sink present while open");
        let offset = sink.tell();
        sink.write(data)?;

        self.audio_sample_offsets.push(offset);
        self.audio_sample_sizes.push(data.len() as u32);
        self.audio_sample_durations.push(duration);
        self.audio_sample_total += duration as u64;
        Ok(())
    }

    /// Write the `moov`, patch the `mdat` largesize, and close the file.
    pub fn finalize(&mut self) -> MuxResult<()> {
        match self.state {
            MuxerState::Finalized => return Ok(()),
            // Never opened: nothing on disk, and without a codec record
            // there is nothing valid to write.
            MuxerState::Unset => return Err(MuxError::VideoHeaderMissing),
            MuxerState::Open => {}
        }
        if self.codec_config.is_empty() {
            return Err(MuxError::VideoHeaderMissing);
        }

        let Some(mut sink) = self.sink.take() else {
            return Err(MuxError::InvalidState("sink already closed"));
        };
        // Terminal from here on: a failed index write leaves a dead file,
        // not a muxer that accepts more samples.
        self.state = MuxerState::Finalized;
        let data_end = sink.tell();

        let video = VideoTrack {
            codec: self.codec,
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
            codec_config: &self.codec_config,
            sample_sizes: &self.sample_sizes,
            sample_offsets: &self.sample_offsets,
            sync_samples: &self.sync_samples,
        };
        let audio = self.audio.as_ref().filter(|_| !self.audio_sample_sizes.is_empty()).map(
            |params| AudioTrack {
                sample_rate: params.sample_rate,
                channels: params.channels,
                bitrate: params.bitrate,
                audio_specific_config: &params.audio_specific_config,
                sample_sizes: &self.audio_sample_sizes,
                sample_offsets: &self.audio_sample_offsets,
                sample_durations: &self.audio_sample_durations,
                sample_total: self.audio_sample_total,
            },
        );

        let moov = mp4::build_moov(&video, audio.as_ref());
        sink.write(&moov)?;
        let file_end = sink.tell();

        let mdat_size = data_end - self.mdat_header_offset;
        sink.seek(self.mdat_largesize_offset)?;
        sink.write(&mdat_size.to_be_bytes())?;
        sink.seek(file_end)?;
        sink.close()?;

        info!(
            video_samples = self.sample_sizes.len(),
            audio_samples = self.audio_sample_sizes.len(),
            mdat_size,
            file_size = file_end,
            "MP4 finalized"
        );
        Ok(())
    }

    // -- Accessors used by the controller and tests --

    pub fn video_sample_count(&self) -> usize {
        self.sample_sizes.len()
    }

    pub fn audio_sample_count(&self) -> usize {
        self.audio_sample_sizes.len()
    }

    pub fn audio_sample_total(&self) -> u64 {
        self.audio_sample_total
    }

    pub fn mdat_data_offset(&self) -> u64 {
        self.mdat_data_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec_config;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("sc_muxer_test_{name}.mp4"));
        path
    }

    fn make_muxer(name: &str) -> (Mp4Muxer, PathBuf) {
        let path = temp_path(name);
        let muxer = Mp4Muxer::new(
            VideoCodec::H264,
            MuxerConfig {
                width: 1280,
                height: 720,
                fps: 30,
                output_path: path.clone(),
            },
        );
        (muxer, path)
    }

    fn test_record() -> Vec<u8> {
        codec_config::build_avcc(&[0x67, 0x64, 0x00, 0x1F, 0xAC], &[0x68, 0xEB]).unwrap()
    }

    fn find_box(buf: &[u8], fourcc: &[u8; 4]) -> Option<usize> {
        buf.windows(4).position(|w| w == fourcc).map(|p| p - 4)
    }

    #[test]
    fn unset_until_initialized() {
        let (mut muxer, path) = make_muxer("unset");
        assert_eq!(muxer.state(), MuxerState::Unset);
        assert!(!path.exists());

        muxer.initialize(test_record()).unwrap();
        assert_eq!(muxer.state(), MuxerState::Open);
        assert!(path.exists());
        // ftyp(32) + mdat header(16)
        assert_eq!(muxer.mdat_data_offset(), 48);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn finalize_without_header_fails_and_leaves_no_file() {
        let (mut muxer, path) = make_muxer("no_header");
        let err = muxer.finalize().unwrap_err();
        assert_eq!(err.to_string(), "Video codec header not found.");
        assert!(!path.exists());
    }

    #[test]
    fn empty_initialize_rejected() {
        let (mut muxer, path) = make_muxer("empty_record");
        assert!(matches!(
            muxer.initialize(Vec::new()),
            Err(MuxError::VideoHeaderMissing)
        ));
        assert!(!path.exists());
    }

    #[test]
    fn video_before_open_rejected() {
        let (mut muxer, _path) = make_muxer("early_video");
        assert!(muxer.append_video(&[1, 2, 3], true).is_err());
    }

    #[test]
    fn single_sample_file_layout() {
        let (mut muxer, path) = make_muxer("single");
        muxer.initialize(test_record()).unwrap();
        let sample = [0u8, 0, 0, 4, 0x65, 1, 2, 3];
        muxer.append_video(&sample, true).unwrap();
        muxer.finalize().unwrap();

        let data = std::fs::read(&path).unwrap();
        // ftyp first, 32 bytes.
        assert_eq!(&data[0..4], &[0, 0, 0, 32]);
        assert_eq!(&data[4..8], b"ftyp");
        assert_eq!(&data[8..12], b"isom");
        assert_eq!(&data[16..20], b"isom");
        assert_eq!(&data[20..24], b"iso2");
        assert_eq!(&data[24..28], b"avc1");
        assert_eq!(&data[28..32], b"mp41");

        // mdat header: size 1 + largesize = 16 + sample bytes.
        assert_eq!(&data[32..36], &[0, 0, 0, 1]);
        assert_eq!(&data[36..40], b"mdat");
        let largesize = u64::from_be_bytes(data[40..48].try_into().unwrap());
        assert_eq!(largesize, 16 + sample.len() as u64);

        // Sample body sits at the mdat data offset.
        assert_eq!(&data[48..48 + sample.len()], &sample);

        // moov directly after the media data.
        let moov_at = 48 + sample.len();
        assert_eq!(&data[moov_at + 4..moov_at + 8], b"moov");
        let moov_size = u32::from_be_bytes(data[moov_at..moov_at + 4].try_into().unwrap());
        assert_eq!(moov_at + moov_size as usize, data.len());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn sample_tables_accumulate() {
        let (mut muxer, path) = make_muxer("tables");
        muxer.initialize(test_record()).unwrap();

        muxer.append_video(&[0xAA; 100], true).unwrap();
        muxer.append_video(&[0xBB; 50], false).unwrap();
        muxer.append_video(&[0xCC; 75], true).unwrap();

        assert_eq!(muxer.video_sample_count(), 3);
        assert_eq!(muxer.sample_sizes, vec![100, 50, 75]);
        assert_eq!(muxer.sample_offsets, vec![48, 148, 198]);
        assert_eq!(muxer.sync_samples, vec![1, 3]);

        // Offsets strictly increasing, sizes sum to mdat payload.
        let payload: u32 = muxer.sample_sizes.iter().sum();
        assert_eq!(payload, 225);

        muxer.finalize().unwrap();
        let data = std::fs::read(&path).unwrap();
        let largesize = u64::from_be_bytes(data[40..48].try_into().unwrap());
        assert_eq!(largesize, 16 + 225);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn audio_buffered_until_open() {
        let (mut muxer, path) = make_muxer("audio_buffer");
        muxer.set_audio_track(AudioTrackParams {
            sample_rate: 48_000,
            channels: 2,
            bitrate: 192_000,
            audio_specific_config: codec_config::build_audio_specific_config(48_000, 2),
        });

        // Audio first: nothing hits the disk yet.
        muxer.append_audio(&[0x11; 64], 1024).unwrap();
        muxer.append_audio(&[0x22; 64], 1024).unwrap();
        assert_eq!(muxer.audio_sample_count(), 0);
        assert!(!path.exists());

        muxer.initialize(test_record()).unwrap();
        assert_eq!(muxer.audio_sample_count(), 2);
        assert_eq!(muxer.audio_sample_total(), 2048);
        assert_eq!(muxer.audio_sample_offsets, vec![48, 112]);

        muxer.append_video(&[0xAA; 10], true).unwrap();
        muxer.finalize().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert!(find_box(&data, b"soun").is_some());
        assert!(find_box(&data, b"mp4a").is_some());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn audio_without_samples_has_no_track() {
        let (mut muxer, path) = make_muxer("no_audio_samples");
        muxer.set_audio_track(AudioTrackParams {
            sample_rate: 48_000,
            channels: 2,
            bitrate: 192_000,
            audio_specific_config: vec![0x11, 0x90],
        });
        muxer.initialize(test_record()).unwrap();
        muxer.append_video(&[0xAA; 10], true).unwrap();
        muxer.finalize().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert!(find_box(&data, b"soun").is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn finalize_twice_is_idempotent() {
        let (mut muxer, path) = make_muxer("double_finalize");
        muxer.initialize(test_record()).unwrap();
        muxer.append_video(&[0xAA; 10], true).unwrap();
        muxer.finalize().unwrap();
        muxer.finalize().unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn initialize_twice_is_noop() {
        let (mut muxer, path) = make_muxer("double_init");
        muxer.initialize(test_record()).unwrap();
        let offset = muxer.mdat_data_offset();
        muxer.initialize(test_record()).unwrap();
        assert_eq!(muxer.mdat_data_offset(), offset);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn offsets_fall_inside_mdat() {
        let (mut muxer, path) = make_muxer("bounds");
        muxer.initialize(test_record()).unwrap();
        for i in 0..10 {
            muxer.append_video(&vec![i as u8; 32], i == 0).unwrap();
        }
        let data_offset = muxer.mdat_data_offset();
        let header_offset = muxer.mdat_header_offset;
        muxer.finalize().unwrap();

        let data = std::fs::read(&path).unwrap();
        let largesize = u64::from_be_bytes(data[40..48].try_into().unwrap());
        for (&offset, &size) in muxer.sample_offsets.iter().zip(&muxer.sample_sizes) {
            assert!(offset >= data_offset);
            assert!(offset + size as u64 <= header_offset + largesize);
        }
        std::fs::remove_file(&path).ok();
    }
}

//! The writer pump: a single background thread that owns all disk writes
//! between the muxer opening and finalize.
//!
//! Producers (the video and audio paths on the caller's thread) hand
//! samples off by move through an unbounded channel; the worker drains
//! FIFO and appends under the file mutex. The queue is unbounded by
//! design — producers are rate-limited by frame submission, so memory
//! growth is bounded by per-frame size times the frames in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam::channel::{self, Sender};
use thiserror::Error;
use tracing::{debug, error, info};

use sc_mux::Mp4Muxer;

/// A tagged sample on its way to the file.
#[derive(Debug)]
pub enum WriterMessage {
    Video { data: Vec<u8>, keyframe: bool },
    Audio { data: Vec<u8>, duration: u32 },
}

/// Writer-side failures reported back to producers.
#[derive(Error, Debug)]
pub enum WriterError {
    /// A previous write failed; the session is dead.
    #[error("Writer thread error: {0}")]
    Failed(String),

    /// The pump was already stopped.
    #[error("Writer thread is not running")]
    Stopped,
}

/// Handle to the background writer thread.
pub struct WriterPump {
    tx: Option<Sender<WriterMessage>>,
    worker: Option<JoinHandle<()>>,
    failed: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<String>>>,
}

impl WriterPump {
    /// Spawn the worker over the shared muxer.
    pub fn spawn(muxer: Arc<Mutex<Mp4Muxer>>) -> Self {
        let (tx, rx) = channel::unbounded::<WriterMessage>();
        let failed = Arc::new(AtomicBool::new(false));
        let failure = Arc::new(Mutex::new(None));

        let worker_failed = failed.clone();
        let worker_failure = failure.clone();
        let worker = std::thread::Builder::new()
            .name("mp4-writer".to_string())
            .spawn(move || {
                for message in rx.iter() {
                    // After a failure, keep draining so producers unblock,
                    // but stop touching the file.
                    if worker_failed.load(Ordering::SeqCst) {
                        continue;
                    }

                    let result = {
                        let mut muxer = muxer.lock().expect("file mutex poisoned");
                        match &message {
                            WriterMessage::Video { data, keyframe } => {
                                muxer.append_video(data, *keyframe)
                            }
                            WriterMessage::Audio { data, duration } => {
                                muxer.append_audio(data, *duration)
                            }
                        }
                    };

                    if let Err(e) = result {
                        error!(error = %e, "Writer thread failed");
                        *worker_failure.lock().expect("failure slot poisoned") =
                            Some(e.to_string());
                        worker_failed.store(true, Ordering::SeqCst);
                    }
                }
                debug!("Writer thread exiting");
            })
            .expect("failed to spawn writer thread");

        Self {
            tx: Some(tx),
            worker: Some(worker),
            failed,
            failure,
        }
    }

    /// Queue one sample for writing.
    pub fn enqueue(&self, message: WriterMessage) -> Result<(), WriterError> {
        if self.failed.load(Ordering::SeqCst) {
            let msg = self
                .failure
                .lock()
                .expect("failure slot poisoned")
                .clone()
                .unwrap_or_else(|| "unknown write failure".to_string());
            return Err(WriterError::Failed(msg));
        }
        self.tx
            .as_ref()
            .ok_or(WriterError::Stopped)?
            .send(message)
            .map_err(|_| WriterError::Stopped)
    }

    /// Stop the pump: close the channel, let the residual queue drain, and
    /// join the worker.
    pub fn stop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Writer thread panicked");
                self.failed.store(true, Ordering::SeqCst);
            }
        }
        info!("Writer pump stopped");
    }

    /// The first write failure, if any.
    pub fn take_failure(&self) -> Option<String> {
        if !self.failed.load(Ordering::SeqCst) {
            return None;
        }
        Some(
            self.failure
                .lock()
                .expect("failure slot poisoned")
                .clone()
                .unwrap_or_else(|| "unknown write failure".to_string()),
        )
    }
}

impl Drop for WriterPump {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_common::VideoCodec;
    use sc_mux::{codec_config, MuxerConfig};
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("sc_writer_test_{name}.mp4"));
        path
    }

    fn open_muxer(name: &str) -> (Arc<Mutex<Mp4Muxer>>, PathBuf) {
        let path = temp_path(name);
        let mut muxer = Mp4Muxer::new(
            VideoCodec::H264,
            MuxerConfig {
                width: 640,
                height: 480,
                fps: 30,
                output_path: path.clone(),
            },
        );
        muxer
            .initialize(codec_config::build_avcc(&[0x67, 0x64, 0, 0x1F], &[0x68, 0xEB]).unwrap())
            .unwrap();
        (Arc::new(Mutex::new(muxer)), path)
    }

    #[test]
    fn samples_arrive_in_fifo_order() {
        let (muxer, path) = open_muxer("fifo");
        let mut pump = WriterPump::spawn(muxer.clone());

        for i in 0..20u8 {
            pump.enqueue(WriterMessage::Video {
                data: vec![i; 16],
                keyframe: i == 0,
            })
            .unwrap();
        }
        pump.stop();

        let muxer = muxer.lock().unwrap();
        assert_eq!(muxer.video_sample_count(), 20);
        drop(muxer);

        // First sample body starts with 0, second with 1, in file order.
        let data = std::fs::read(&path).unwrap();
        assert_eq!(data[48], 0);
        assert_eq!(data[48 + 16], 1);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn mixed_tracks_interleave_by_arrival() {
        let (muxer, path) = open_muxer("mixed");
        let mut pump = WriterPump::spawn(muxer.clone());

        pump.enqueue(WriterMessage::Video {
            data: vec![0xF0; 8],
            keyframe: true,
        })
        .unwrap();
        pump.enqueue(WriterMessage::Audio {
            data: vec![0xA1; 8],
            duration: 1024,
        })
        .unwrap();
        pump.enqueue(WriterMessage::Video {
            data: vec![0xB2; 8],
            keyframe: false,
        })
        .unwrap();
        pump.stop();

        let muxer = muxer.lock().unwrap();
        assert_eq!(muxer.video_sample_count(), 2);
        assert_eq!(muxer.audio_sample_count(), 1);
        assert_eq!(muxer.audio_sample_total(), 1024);
        drop(muxer);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn stop_drains_residual_queue() {
        let (muxer, path) = open_muxer("drain");
        let mut pump = WriterPump::spawn(muxer.clone());
        for _ in 0..200 {
            pump.enqueue(WriterMessage::Video {
                data: vec![0xCC; 64],
                keyframe: false,
            })
            .unwrap();
        }
        pump.stop();
        assert_eq!(muxer.lock().unwrap().video_sample_count(), 200);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn enqueue_after_stop_fails() {
        let (muxer, path) = open_muxer("stopped");
        let mut pump = WriterPump::spawn(muxer);
        pump.stop();
        assert!(matches!(
            pump.enqueue(WriterMessage::Video {
                data: vec![0; 4],
                keyframe: false
            }),
            Err(WriterError::Stopped)
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn no_failure_reported_on_clean_run() {
        let (muxer, path) = open_muxer("clean");
        let mut pump = WriterPump::spawn(muxer);
        pump.enqueue(WriterMessage::Video {
            data: vec![1, 2, 3],
            keyframe: true,
        })
        .unwrap();
        pump.stop();
        assert!(pump.take_failure().is_none());
        std::fs::remove_file(&path).ok();
    }
}

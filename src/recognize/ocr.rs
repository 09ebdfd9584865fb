//! OCR engine abstraction and the timeout-enforcing client.
//!
//! The engine itself is a capability trait so tests can script replies and
//! so the Tesseract backend stays an optional dependency. Engines are
//! constructed and driven on a dedicated worker thread; the client tags
//! every request with an id and enforces a deadline on the reply, treating
//! expiry as a recognition failure rather than an error.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use image::GrayImage;
use tracing::{debug, warn};

use crate::core::errors::ScanError;

/// A synchronous text recognizer for one single-line image strip.
pub trait OcrEngine {
    fn recognize(&mut self, image: &GrayImage) -> Result<String, ScanError>;
}

struct Request {
    id: u64,
    image: GrayImage,
}

struct Reply {
    id: u64,
    result: Result<String, ScanError>,
}

/// Runs an [`OcrEngine`] on a worker thread with a per-request deadline.
///
/// The engine is built by the supplied factory on the worker itself, so the
/// engine type does not need to be `Send`. A request whose reply misses the
/// deadline yields `Ok(None)`; the stale reply is discarded when it
/// eventually arrives.
pub struct OcrClient {
    requests: Sender<Request>,
    replies: Receiver<Reply>,
    timeout: Duration,
    next_id: u64,
    worker: Option<JoinHandle<()>>,
}

impl OcrClient {
    /// Spawns the worker and constructs the engine on it. Fails if the
    /// factory does.
    pub fn spawn<E, F>(factory: F, timeout: Duration) -> Result<Self, ScanError>
    where
        E: OcrEngine,
        F: FnOnce() -> Result<E, ScanError> + Send + 'static,
    {
        let (request_tx, request_rx) = channel::<Request>();
        let (reply_tx, reply_rx) = channel::<Reply>();
        let (init_tx, init_rx) = channel::<Result<(), ScanError>>();

        let worker = std::thread::spawn(move || {
            let mut engine = match factory() {
                Ok(engine) => {
                    let _ = init_tx.send(Ok(()));
                    engine
                }
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                    return;
                }
            };
            while let Ok(request) = request_rx.recv() {
                let result = engine.recognize(&request.image);
                if reply_tx
                    .send(Reply {
                        id: request.id,
                        result,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });

        match init_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                requests: request_tx,
                replies: reply_rx,
                timeout,
                next_id: 0,
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(ScanError::ocr("ocr worker died during initialization")),
        }
    }

    /// Recognizes one strip. `Ok(None)` means the deadline expired or the
    /// engine reported a per-image failure; both degrade to an unrecognized
    /// box. `Err` means the worker is gone and the batch cannot continue.
    pub fn recognize(&mut self, image: &GrayImage) -> Result<Option<String>, ScanError> {
        let id = self.next_id;
        self.next_id += 1;
        self.requests
            .send(Request {
                id,
                image: image.clone(),
            })
            .map_err(|_| ScanError::ocr("ocr worker is no longer running"))?;

        let deadline = std::time::Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok(reply) if reply.id < id => {
                    // Answer to a request that already timed out.
                    debug!(stale_id = reply.id, "discarding stale ocr reply");
                }
                Ok(reply) => {
                    return match reply.result {
                        Ok(text) => Ok(Some(text)),
                        Err(e) => {
                            warn!(error = %e, "ocr engine failed on strip");
                            Ok(None)
                        }
                    };
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(timeout_ms = self.timeout.as_millis() as u64, "ocr request timed out");
                    return Ok(None);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ScanError::ocr("ocr worker is no longer running"));
                }
            }
        }
    }
}

impl Drop for OcrClient {
    fn drop(&mut self) {
        // Closing the request channel lets the worker loop exit.
        let (dead_tx, _) = channel();
        self.requests = dead_tx;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Tesseract backend in single-line page segmentation mode.
#[cfg(feature = "tesseract")]
pub struct TesseractEngine {
    engine: leptess::LepTess,
}

#[cfg(feature = "tesseract")]
impl TesseractEngine {
    pub fn new(language: &str) -> Result<Self, ScanError> {
        let mut engine = leptess::LepTess::new(None, language).map_err(|e| {
            ScanError::ocr_with_source("initializing tesseract", Box::new(e))
        })?;
        // PSM 7: treat the image as a single text line.
        engine
            .set_variable(leptess::Variable::TesseditPagesegMode, "7")
            .map_err(|e| ScanError::ocr_with_source("setting page segmentation mode", Box::new(e)))?;
        Ok(Self { engine })
    }
}

#[cfg(feature = "tesseract")]
impl OcrEngine for TesseractEngine {
    fn recognize(&mut self, image: &GrayImage) -> Result<String, ScanError> {
        let mut png = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| ScanError::ocr_with_source("encoding strip for tesseract", Box::new(e)))?;
        self.engine
            .set_image_from_mem(&png)
            .map_err(|e| ScanError::ocr_with_source("loading strip into tesseract", Box::new(e)))?;
        let text = self
            .engine
            .get_utf8_text()
            .map_err(|e| ScanError::ocr_with_source("reading tesseract output", Box::new(e)))?;
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoEngine;

    impl OcrEngine for EchoEngine {
        fn recognize(&mut self, image: &GrayImage) -> Result<String, ScanError> {
            Ok(format!("{}x{}", image.width(), image.height()))
        }
    }

    struct SlowEngine;

    impl OcrEngine for SlowEngine {
        fn recognize(&mut self, _image: &GrayImage) -> Result<String, ScanError> {
            std::thread::sleep(Duration::from_millis(200));
            Ok("TOO LATE".into())
        }
    }

    struct FailingEngine;

    impl OcrEngine for FailingEngine {
        fn recognize(&mut self, _image: &GrayImage) -> Result<String, ScanError> {
            Err(ScanError::ocr("glyph model exploded"))
        }
    }

    #[test]
    fn test_reply_round_trip() {
        let mut client =
            OcrClient::spawn(|| Ok(EchoEngine), Duration::from_secs(5)).unwrap();
        let text = client.recognize(&GrayImage::new(12, 7)).unwrap();
        assert_eq!(text.as_deref(), Some("12x7"));
    }

    #[test]
    fn test_timeout_yields_none() {
        let mut client =
            OcrClient::spawn(|| Ok(SlowEngine), Duration::from_millis(20)).unwrap();
        let text = client.recognize(&GrayImage::new(4, 4)).unwrap();
        assert_eq!(text, None);
    }

    #[test]
    fn test_stale_reply_skipped_for_next_request() {
        struct SlowThenFast {
            calls: u32,
        }
        impl OcrEngine for SlowThenFast {
            fn recognize(&mut self, _image: &GrayImage) -> Result<String, ScanError> {
                self.calls += 1;
                if self.calls == 1 {
                    std::thread::sleep(Duration::from_millis(100));
                    Ok("SLOW".into())
                } else {
                    Ok("FAST".into())
                }
            }
        }

        let mut client = OcrClient::spawn(
            || Ok(SlowThenFast { calls: 0 }),
            Duration::from_millis(30),
        )
        .unwrap();
        assert_eq!(client.recognize(&GrayImage::new(4, 4)).unwrap(), None);
        // The second request must not see the first request's late reply.
        std::thread::sleep(Duration::from_millis(120));
        let text = client.recognize(&GrayImage::new(4, 4)).unwrap();
        assert_eq!(text.as_deref(), Some("FAST"));
    }

    #[test]
    fn test_engine_failure_degrades_to_none() {
        let mut client =
            OcrClient::spawn(|| Ok(FailingEngine), Duration::from_secs(1)).unwrap();
        assert_eq!(client.recognize(&GrayImage::new(4, 4)).unwrap(), None);
    }

    #[test]
    fn test_factory_failure_propagates() {
        let result = OcrClient::spawn(
            || Err::<EchoEngine, _>(ScanError::ocr("no language data")),
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }
}

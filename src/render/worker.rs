//! Render worker - runs in a separate thread

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use flume::{Receiver, Sender};
use log::{debug, info, warn};

use super::document::PageSource;
use super::job::RenderJob;
use super::request::{WorkerFault, WorkerRequest, WorkerResponse};

/// Spawn the background thread that executes render jobs one at a time
pub(crate) fn spawn_render_worker(
    source: Arc<dyn PageSource>,
    requests: Receiver<WorkerRequest>,
    responses: Sender<WorkerResponse>,
) {
    std::thread::spawn(move || {
        render_worker(source.as_ref(), &requests, &responses);
    });
}

/// Main worker loop - exits on `Shutdown` or when the provider is dropped
pub(crate) fn render_worker(
    source: &dyn PageSource,
    requests: &Receiver<WorkerRequest>,
    responses: &Sender<WorkerResponse>,
) {
    info!("Render worker started");

    for request in requests.iter() {
        match request {
            WorkerRequest::Render(job) => {
                let response = execute(source, &job);
                if responses.send(response).is_err() {
                    break;
                }
            }
            WorkerRequest::Shutdown => break,
        }
    }

    info!("Render worker stopped");
}

fn execute(source: &dyn PageSource, job: &RenderJob) -> WorkerResponse {
    // A panicking backend must not take the worker thread down with it
    let outcome = catch_unwind(AssertUnwindSafe(|| job.run(source)))
        .unwrap_or_else(|payload| Err(WorkerFault::failed(panic_message(payload.as_ref()))));

    match outcome {
        Ok(image) => WorkerResponse::Rendered { job: job.id, image },
        Err(error) if error.is_cancelled() => {
            debug!("Render cancelled: page = {} scale = {}", job.page, job.scale);
            WorkerResponse::Cancelled(job.id)
        }
        Err(error) => {
            warn!(
                "Render failed: page = {} scale = {}: {error}",
                job.page, job.scale
            );
            WorkerResponse::Failed { job: job.id, error }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    format!("backend panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::cancel::CancelToken;
    use crate::render::document::SyntheticDocument;
    use crate::render::request::JobId;
    use crate::render::types::{PageNumber, PixelSize, PointSize, Scale};
    use image::RgbaImage;

    /// Panics on page 0, delegates everything else
    struct PanicsOnFirstPage(SyntheticDocument);

    impl PageSource for PanicsOnFirstPage {
        fn page_count(&self) -> usize {
            self.0.page_count()
        }

        fn page_point_size(&self, page: PageNumber) -> Option<PointSize> {
            self.0.page_point_size(page)
        }

        fn render(
            &self,
            page: PageNumber,
            size: PixelSize,
            cancel: &CancelToken,
        ) -> Result<RgbaImage, WorkerFault> {
            if page == 0 {
                panic!("corrupt xref table");
            }
            self.0.render(page, size, cancel)
        }
    }

    fn job(id: u64, page: usize) -> RenderJob {
        RenderJob {
            id: JobId::new(id),
            page,
            scale: Scale::new(1.0).unwrap(),
            pixel_ratio: 1.0,
            cancel: CancelToken::new(),
        }
    }

    #[test]
    fn worker_answers_each_job_then_stops() {
        let doc = SyntheticDocument::uniform(2, PointSize::new(10.0, 10.0));
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();

        let cancelled = job(2, 1);
        cancelled.cancel.cancel();

        request_tx.send(WorkerRequest::Render(job(1, 0))).unwrap();
        request_tx.send(WorkerRequest::Render(cancelled)).unwrap();
        request_tx.send(WorkerRequest::Render(job(3, 9))).unwrap();
        request_tx.send(WorkerRequest::Shutdown).unwrap();
        request_tx.send(WorkerRequest::Render(job(4, 0))).unwrap();

        render_worker(&doc, &request_rx, &response_tx);

        let responses: Vec<_> = response_rx.try_iter().collect();
        assert_eq!(responses.len(), 3);
        assert!(matches!(
            responses[0],
            WorkerResponse::Rendered { job: JobId(1), .. }
        ));
        assert!(matches!(responses[1], WorkerResponse::Cancelled(JobId(2))));
        assert!(matches!(
            responses[2],
            WorkerResponse::Failed {
                job: JobId(3),
                error: WorkerFault::MissingPage(9)
            }
        ));
    }

    #[test]
    fn panicking_backend_reports_failure_and_worker_keeps_going() {
        let doc = PanicsOnFirstPage(SyntheticDocument::uniform(2, PointSize::new(10.0, 10.0)));
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();

        request_tx.send(WorkerRequest::Render(job(1, 0))).unwrap();
        request_tx.send(WorkerRequest::Render(job(2, 1))).unwrap();
        request_tx.send(WorkerRequest::Shutdown).unwrap();

        render_worker(&doc, &request_rx, &response_tx);

        let responses: Vec<_> = response_rx.try_iter().collect();
        assert_eq!(responses.len(), 2);
        match &responses[0] {
            WorkerResponse::Failed {
                job: JobId(1),
                error: WorkerFault::RenderFailed { detail },
            } => assert!(detail.contains("corrupt xref table")),
            other => panic!("expected failure for job 1, got {other:?}"),
        }
        assert!(matches!(
            responses[1],
            WorkerResponse::Rendered { job: JobId(2), .. }
        ));
    }
}

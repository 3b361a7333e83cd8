use std::sync::Arc;

use futures::future::BoxFuture;
use teloxide::{error_handlers::ErrorHandler, RequestError};

/// Error handler for the update listener. Long polling times out routinely,
/// so network timeouts are dropped instead of logged.
pub struct UpdateErrorHandler {
    text: String,
}

impl UpdateErrorHandler {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            text: "Update listener".to_owned(),
        })
    }
}

impl ErrorHandler<RequestError> for UpdateErrorHandler {
    fn handle_error(self: Arc<Self>, error: RequestError) -> BoxFuture<'static, ()> {
        if let RequestError::Network(ref e) = error {
            if e.is_timeout() {
                // ignore
                return Box::pin(async {});
            }
        }
        log::error!("{text}: {:?}", error, text = self.text);
        Box::pin(async {})
    }
}

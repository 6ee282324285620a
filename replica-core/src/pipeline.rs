// Filter pipeline for request/response processing

use crate::logging::{debug, trace};
use crate::response::ResponseWriter;
use crate::{Error, HttpRequest};
use async_trait::async_trait;
use std::sync::Arc;

/// Terminal stage of a pipeline: produces the response.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, req: &mut HttpRequest, res: &mut dyn ResponseWriter)
    -> Result<(), Error>;
}

/// Remaining stages of a pipeline, as seen from inside a filter.
#[async_trait]
pub trait FilterChain: Send + Sync {
    /// Run the rest of the pipeline against `req` and `res`.
    async fn proceed(&self, req: &mut HttpRequest, res: &mut dyn ResponseWriter)
    -> Result<(), Error>;
}

/// A stage that may inspect or wrap the request and response, and decides
/// whether the rest of the chain runs.
#[async_trait]
pub trait Filter: Send + Sync {
    async fn do_filter(
        &self,
        req: &mut HttpRequest,
        res: &mut dyn ResponseWriter,
        chain: &dyn FilterChain,
    ) -> Result<(), Error>;
}

/// Ordered filters in front of a handler.
#[derive(Clone)]
pub struct Pipeline {
    filters: Arc<Vec<Arc<dyn Filter>>>,
    handler: Arc<dyn Handler>,
}

impl Pipeline {
    pub fn new<H: Handler + 'static>(handler: H) -> Self {
        Self::with_handler(Arc::new(handler))
    }

    pub fn with_handler(handler: Arc<dyn Handler>) -> Self {
        Self {
            filters: Arc::new(Vec::new()),
            handler,
        }
    }

    /// Append a filter to the chain
    pub fn use_filter<F: Filter + 'static>(&mut self, filter: F) {
        self.use_shared_filter(Arc::new(filter));
    }

    /// Append a filter instance that is also used elsewhere.
    pub fn use_shared_filter(&mut self, filter: Arc<dyn Filter>) {
        let mut filters = (*self.filters).clone();
        filters.push(filter);
        self.filters = Arc::new(filters);
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    /// Run every filter in registration order, then the handler.
    pub async fn dispatch(
        &self,
        req: &mut HttpRequest,
        res: &mut dyn ResponseWriter,
    ) -> Result<(), Error> {
        debug!(
            filter_count = self.filters.len(),
            path = %req.path,
            method = %req.method,
            "Dispatching request"
        );
        Next {
            filters: &self.filters,
            handler: self.handler.as_ref(),
        }
        .proceed(req, res)
        .await
    }
}

struct Next<'a> {
    filters: &'a [Arc<dyn Filter>],
    handler: &'a dyn Handler,
}

#[async_trait]
impl<'a> FilterChain for Next<'a> {
    async fn proceed(
        &self,
        req: &mut HttpRequest,
        res: &mut dyn ResponseWriter,
    ) -> Result<(), Error> {
        match self.filters.split_first() {
            Some((filter, rest)) => {
                trace!(remaining = rest.len(), "Executing filter");
                let next = Next {
                    filters: rest,
                    handler: self.handler,
                };
                filter.do_filter(req, res, &next).await
            }
            None => {
                trace!("Filter chain complete, calling handler");
                self.handler.handle(req, res).await
            }
        }
    }
}

/// Handler backed by a synchronous closure.
pub struct FnHandler<F>(F);

/// Adapt a closure into a [`Handler`].
///
/// ```rust
/// use replica_core::{handler_fn, HttpRequest, HttpResponse, Pipeline, ResponseWriter};
/// use std::io::Write;
///
/// let pipeline = Pipeline::new(handler_fn(|_req: &mut HttpRequest, res: &mut dyn ResponseWriter| {
///     res.set_header("Content-Type", "text/plain");
///     res.body()?.write_all(b"hi")?;
///     Ok(())
/// }));
///
/// let mut req = HttpRequest::new("GET", "/");
/// let mut res = HttpResponse::ok();
/// tokio_test::block_on(pipeline.dispatch(&mut req, &mut res)).unwrap();
/// assert_eq!(res.body, b"hi");
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut HttpRequest, &mut dyn ResponseWriter) -> Result<(), Error> + Send + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut HttpRequest, &mut dyn ResponseWriter) -> Result<(), Error> + Send + Sync,
{
    async fn handle(
        &self,
        req: &mut HttpRequest,
        res: &mut dyn ResponseWriter,
    ) -> Result<(), Error> {
        (self.0)(req, res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpResponse;
    use std::io::Write;
    use std::sync::Mutex;

    struct Tag(&'static str, Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl Filter for Tag {
        async fn do_filter(
            &self,
            req: &mut HttpRequest,
            res: &mut dyn ResponseWriter,
            chain: &dyn FilterChain,
        ) -> Result<(), Error> {
            self.1.lock().unwrap().push(self.0);
            chain.proceed(req, res).await
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Filter for ShortCircuit {
        async fn do_filter(
            &self,
            _req: &mut HttpRequest,
            res: &mut dyn ResponseWriter,
            _chain: &dyn FilterChain,
        ) -> Result<(), Error> {
            res.set_status(403);
            Ok(())
        }
    }

    fn echo_path(req: &mut HttpRequest, res: &mut dyn ResponseWriter) -> Result<(), Error> {
        res.body()?.write_all(req.path.as_bytes())?;
        Ok(())
    }

    #[tokio::test]
    async fn test_filters_run_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(handler_fn(echo_path));
        pipeline.use_filter(Tag("first", order.clone()));
        pipeline.use_filter(Tag("second", order.clone()));

        let mut req = HttpRequest::new("GET", "/ordered");
        let mut res = HttpResponse::ok();
        pipeline.dispatch(&mut req, &mut res).await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(res.body, b"/ordered");
        assert_eq!(pipeline.filter_count(), 2);
    }

    #[tokio::test]
    async fn test_filter_can_skip_handler() {
        let mut pipeline = Pipeline::new(handler_fn(echo_path));
        pipeline.use_filter(ShortCircuit);

        let mut req = HttpRequest::new("GET", "/blocked");
        let mut res = HttpResponse::ok();
        pipeline.dispatch(&mut req, &mut res).await.unwrap();

        assert_eq!(res.status, 403);
        assert!(res.body.is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let pipeline = Pipeline::new(handler_fn(
            |_req: &mut HttpRequest, _res: &mut dyn ResponseWriter| {
                Err(Error::NotFound("nothing here".to_string()))
            },
        ));

        let mut req = HttpRequest::new("GET", "/missing");
        let mut res = HttpResponse::ok();
        let err = pipeline.dispatch(&mut req, &mut res).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}

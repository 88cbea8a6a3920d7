//! Onion-model middleware chain.
//!
//! A [`Pipeline`] is an ordered list of [`Middleware`]; the first piped is the
//! outermost. Each layer gets the request and a [`Next`] continuation. It can
//! annotate the request and continue, return a response without continuing,
//! or continue and then rewrite the response on the way out.

use async_trait::async_trait;
use axum::{extract::Request, response::Response};
use std::{future::Future, pin::Pin, sync::Arc};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, req: Request, next: Next<'_>) -> Response;
}

/// Terminal step of a pipeline.
pub trait Endpoint: Send + Sync {
    fn call(&self, req: Request) -> BoxFuture<'static, Response>;
}

impl<F, Fut> Endpoint for F
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Response> {
        Box::pin(self(req))
    }
}

/// The rest of the chain after the current middleware.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub async fn run(self, req: Request) -> Response {
        match self.chain.split_first() {
            Some((current, rest)) => {
                current
                    .handle(
                        req,
                        Next {
                            chain: rest,
                            endpoint: self.endpoint,
                        },
                    )
                    .await
            }
            None => self.endpoint.call(req).await,
        }
    }
}

#[derive(Clone, Default)]
pub struct Pipeline {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pipe<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub async fn process(&self, req: Request, endpoint: &dyn Endpoint) -> Response {
        Next {
            chain: &self.middleware,
            endpoint,
        }
        .run(req)
        .await
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }
}

/// Per-route requirements read by the middleware, carried in request
/// extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutePolicy {
    pub required_permissions: Vec<String>,
    pub rate_group: Option<String>,
}

impl RoutePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, permission: impl Into<String>) -> Self {
        self.required_permissions.push(permission.into());
        self
    }

    pub fn rate_group(mut self, group: impl Into<String>) -> Self {
        self.rate_group = Some(group.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{HeaderValue, StatusCode},
        response::IntoResponse,
    };
    use std::sync::Mutex;

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Record {
        async fn handle(&self, req: Request, next: Next<'_>) -> Response {
            self.log.lock().unwrap().push(format!("{}:in", self.name));
            let mut res = next.run(req).await;
            self.log.lock().unwrap().push(format!("{}:out", self.name));
            res.headers_mut()
                .append("x-trail", HeaderValue::from_static(self.name));
            res
        }
    }

    struct Refuse;

    #[async_trait]
    impl Middleware for Refuse {
        async fn handle(&self, _req: Request, _next: Next<'_>) -> Response {
            StatusCode::FORBIDDEN.into_response()
        }
    }

    struct Annotate;

    #[async_trait]
    impl Middleware for Annotate {
        async fn handle(&self, mut req: Request, next: Next<'_>) -> Response {
            req.extensions_mut().insert(RoutePolicy::new().require("seen"));
            next.run(req).await
        }
    }

    fn request() -> Request {
        Request::builder().uri("/").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_first_piped_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .pipe(Record {
                name: "a",
                log: log.clone(),
            })
            .pipe(Record {
                name: "b",
                log: log.clone(),
            });

        let handler_log = log.clone();
        let endpoint = move |_req: Request| {
            handler_log.lock().unwrap().push("handler".to_string());
            async { StatusCode::OK.into_response() }
        };

        let res = pipeline.process(request(), &endpoint).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:in", "b:in", "handler", "b:out", "a:out"]
        );

        let trail: Vec<_> = res.headers().get_all("x-trail").iter().collect();
        assert_eq!(trail, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new().pipe(Refuse).pipe(Record {
            name: "inner",
            log: log.clone(),
        });

        let endpoint = |_req: Request| async { StatusCode::OK.into_response() };
        let res = pipeline.process(request(), &endpoint).await;

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_annotation_reaches_handler() {
        let pipeline = Pipeline::new().pipe(Annotate);
        let endpoint = |req: Request| async move {
            match req.extensions().get::<RoutePolicy>() {
                Some(policy) if policy.required_permissions == ["seen"] => {
                    StatusCode::OK.into_response()
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            }
        };

        let res = pipeline.process(request(), &endpoint).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_empty_pipeline_calls_endpoint() {
        let pipeline = Pipeline::new();
        assert!(pipeline.is_empty());
        let endpoint = |_req: Request| async { StatusCode::NO_CONTENT.into_response() };
        let res = pipeline.process(request(), &endpoint).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }
}

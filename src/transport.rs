use async_trait::async_trait;
use futures::future::{select, Either};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{AbortController, Headers, Request, RequestInit, RequestMode, Response};

use crate::error::{AppError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout_ms: u32,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout_ms: u32) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout_ms,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One HTTP exchange. `Err` means no response arrived (network failure or
/// timeout); any status code, including 5xx, comes back as `Ok`.
#[async_trait(?Send)]
pub trait HttpTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// `window.fetch`, aborted when the per-call timeout fires first.
#[derive(Clone, Copy, Default)]
pub struct FetchTransport;

fn js_err(context: &str, e: JsValue) -> AppError {
    AppError::Network(format!("{}: {:?}", context, e))
}

#[async_trait(?Send)]
impl HttpTransport for FetchTransport {
    async fn execute(&self, req: HttpRequest) -> Result<HttpResponse> {
        let window = web_sys::window().ok_or_else(|| AppError::Network("no window".into()))?;

        let headers = Headers::new().map_err(|e| js_err("headers", e))?;
        for (name, value) in &req.headers {
            headers.set(name, value).map_err(|e| js_err("header", e))?;
        }

        let controller = AbortController::new().ok();
        let opts = RequestInit::new();
        opts.set_method(req.method.as_str());
        opts.set_mode(RequestMode::Cors);
        if let Some(body) = &req.body {
            opts.set_body(&JsValue::from_str(body));
        }
        opts.set_headers(&JsValue::from(&headers));
        if let Some(c) = &controller {
            opts.set_signal(Some(&c.signal()));
        }

        let request = Request::new_with_str_and_init(&req.url, &opts).map_err(|e| js_err("request", e))?;
        let fetch = JsFuture::from(window.fetch_with_request(&request));
        let timeout = gloo_timers::future::TimeoutFuture::new(req.timeout_ms);
        futures::pin_mut!(fetch, timeout);

        let resp_value = match select(fetch, timeout).await {
            Either::Left((result, _)) => result.map_err(|e| js_err("fetch", e))?,
            Either::Right(_) => {
                if let Some(c) = controller {
                    c.abort();
                }
                return Err(AppError::Timeout);
            }
        };
        let resp: Response = resp_value.dyn_into().map_err(|e| js_err("response", e))?;
        let status = resp.status();
        let text = JsFuture::from(resp.text().map_err(|e| js_err("body", e))?)
            .await
            .map_err(|e| js_err("body", e))?;

        Ok(HttpResponse {
            status,
            body: text.as_string().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;

    /// Scripted transport: answers by URL, records every request it saw.
    #[derive(Default)]
    pub struct FakeTransport {
        routes: RefCell<Vec<(String, VecDeque<Result<HttpResponse>>)>>,
        pub seen: RefCell<Vec<HttpRequest>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a reply for `url`; the last queued reply repeats forever.
        pub fn reply(&self, url: &str, reply: Result<HttpResponse>) -> &Self {
            let mut routes = self.routes.borrow_mut();
            match routes.iter_mut().find(|(u, _)| u == url) {
                Some((_, q)) => q.push_back(reply),
                None => routes.push((url.to_string(), VecDeque::from([reply]))),
            }
            self
        }

        pub fn status(&self, url: &str, status: u16, body: &str) -> &Self {
            self.reply(url, Ok(HttpResponse { status, body: body.to_string() }))
        }

        pub fn down(&self, url: &str) -> &Self {
            self.reply(url, Err(AppError::Network("connection refused".into())))
        }

        pub fn urls(&self) -> Vec<String> {
            self.seen.borrow().iter().map(|r| r.url.clone()).collect()
        }
    }

    #[async_trait(?Send)]
    impl HttpTransport for FakeTransport {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            let url = request.url.clone();
            self.seen.borrow_mut().push(request);
            let mut routes = self.routes.borrow_mut();
            match routes.iter_mut().find(|(u, _)| *u == url) {
                Some((_, q)) if q.len() > 1 => q.pop_front().unwrap(),
                Some((_, q)) => q.front().cloned().unwrap(),
                None => Err(AppError::Network(format!("no route for {}", url))),
            }
        }
    }
}

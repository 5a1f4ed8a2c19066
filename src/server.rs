use crate::config::HEALTH_PATH;
use crate::health::HealthTracker;
use crate::metrics_auth;
use crate::scrape::Scraper;
use anyhow::{anyhow, Result};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::thread;
use tiny_http::{Header, Method, Request, Response as HttpResponse, Server};

type Body = HttpResponse<Cursor<Vec<u8>>>;

/// State shared by request threads; the scraper itself is read-only.
pub struct Exporter {
    scraper: Scraper,
    telemetry_path: String,
    metrics_token: Option<String>,
    health: Mutex<HealthTracker>,
}

impl Exporter {
    pub fn new(scraper: Scraper, telemetry_path: impl Into<String>, metrics_token: Option<String>) -> Self {
        Self {
            scraper,
            telemetry_path: telemetry_path.into(),
            metrics_token,
            health: Mutex::new(HealthTracker::new()),
        }
    }

    pub fn telemetry_path(&self) -> &str {
        &self.telemetry_path
    }

    /// Routes one request; `authorization` holds the request's Authorization header values.
    pub fn respond_to(&self, method: &Method, url: &str, authorization: &[&str]) -> Body {
        let path = url.split('?').next().unwrap_or_default();
        let Some(route) = self.route(path) else {
            return HttpResponse::from_string("not found").with_status_code(404);
        };
        if *method != Method::Get && *method != Method::Head {
            return HttpResponse::from_string("method not allowed").with_status_code(405);
        }

        match route {
            Route::Metrics | Route::Health if !self.authorized(authorization) => unauthorized(),
            Route::Metrics => self.metrics(),
            Route::Health => self.health_json(),
            Route::Landing => self.landing_page(),
        }
    }

    fn route(&self, path: &str) -> Option<Route> {
        if path == self.telemetry_path {
            Some(Route::Metrics)
        } else if path == HEALTH_PATH {
            Some(Route::Health)
        } else if path == "/" {
            Some(Route::Landing)
        } else {
            None
        }
    }

    fn authorized(&self, authorization: &[&str]) -> bool {
        metrics_auth::authorize(authorization.iter().copied(), self.metrics_token.as_deref())
    }

    /// Always 200: a broken scrape yields an empty body and an error in the log.
    fn metrics(&self) -> Body {
        let mut body = Vec::new();
        let result = self.scraper.scrape(&mut body);
        if let Ok(mut h) = self.health.lock() {
            match &result {
                Ok(report) => {
                    if let Some(err) = &report.smi_error {
                        h.record_smi_error(err.clone());
                    }
                    h.record_scrape(report.devices, report.anomalies);
                }
                Err(err) => h.record_failed_scrape(err.to_string()),
            }
        }
        if let Ok(report) = &result {
            log::debug!(
                "scrape served {} lines for {} gpus ({} anomalies)",
                report.lines_written,
                report.devices,
                report.anomalies
            );
        }
        HttpResponse::from_data(body)
            .with_status_code(200)
            .with_header(content_type("text/plain; version=0.0.4"))
    }

    fn health_json(&self) -> Body {
        let snapshot = self.health.lock().ok().map(|h| h.get_health());
        let json = snapshot
            .and_then(|s| serde_json::to_string(&s).ok())
            .unwrap_or_else(|| "{}".to_string());
        HttpResponse::from_string(json)
            .with_status_code(200)
            .with_header(content_type("application/json"))
    }

    fn landing_page(&self) -> Body {
        let html = format!(
            concat!(
                "<html><head><title>nvidia-smi exporter</title></head>",
                "<body><h1>nvidia-smi exporter</h1>",
                "<p><a href=\"{path}\">Metrics</a></p>",
                "<p><a href=\"{health}\">Health</a></p>",
                "</body></html>\n"
            ),
            path = self.telemetry_path,
            health = HEALTH_PATH
        );
        HttpResponse::from_string(html)
            .with_status_code(200)
            .with_header(content_type("text/html; charset=utf-8"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Metrics,
    Health,
    Landing,
}

fn unauthorized() -> Body {
    HttpResponse::from_string("unauthorized").with_status_code(401)
}

fn content_type(value: &'static str) -> Header {
    Header::from_bytes(&b"Content-Type"[..], value.as_bytes()).expect("static header value is ASCII")
}

/// Serves until the listener fails; each request is handled on its own thread.
pub fn serve(exporter: Arc<Exporter>, listen_address: &str) -> Result<()> {
    let server = Server::http(listen_address)
        .map_err(|err| anyhow!("error binding {listen_address}: {err}"))?;
    log::info!(
        "listening on {listen_address}, metrics at {}",
        exporter.telemetry_path()
    );

    for request in server.incoming_requests() {
        let exporter = Arc::clone(&exporter);
        thread::spawn(move || handle(&exporter, request));
    }
    Ok(())
}

fn handle(exporter: &Exporter, request: Request) {
    let authorization = metrics_auth::authorization_headers(&request);
    let authorization: Vec<&str> = authorization.iter().map(String::as_str).collect();
    let response = exporter.respond_to(request.method(), request.url(), &authorization);
    if let Err(err) = request.respond(response) {
        log::warn!("error writing HTTP response: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldPlan;
    use crate::smi::StaticSource;
    use std::io::Read;

    fn exporter(output: &str, token: Option<&str>) -> Exporter {
        let plan = FieldPlan::new(&["temperature.gpu", "pstate"], "pstate").unwrap();
        let scraper = Scraper::new(plan, Box::new(StaticSource::new(output)));
        Exporter::new(scraper, "/metrics", token.map(str::to_string))
    }

    fn body(resp: Body) -> String {
        let mut text = String::new();
        resp.into_reader().read_to_string(&mut text).unwrap();
        text
    }

    #[test]
    fn metrics_path_serves_exposition() {
        let exp = exporter("GPU-A, 0, 65, P2\n", None);
        let resp = exp.respond_to(&Method::Get, "/metrics", &[]);
        assert_eq!(resp.status_code().0, 200);
        let text = body(resp);
        assert!(text.starts_with("nvidia_temperature_gpu{gpu=\"GPU-A[0]\"} 65.000000\n"));
    }

    #[test]
    fn bad_csv_still_returns_200_with_empty_body() {
        let exp = exporter("GPU-A, 0, 65, P2\nGPU-B\n", None);
        let resp = exp.respond_to(&Method::Get, "/metrics", &[]);
        assert_eq!(resp.status_code().0, 200);
        assert!(body(resp).is_empty());
        let health = exp.health.lock().unwrap().get_health();
        assert_eq!(health.failed_scrapes, 1);
    }

    #[test]
    fn token_guards_metrics_and_health() {
        let exp = exporter("GPU-A, 0, 65, P2\n", Some("t0k"));
        assert_eq!(exp.respond_to(&Method::Get, "/metrics", &[]).status_code().0, 401);
        assert_eq!(exp.respond_to(&Method::Get, "/health", &[]).status_code().0, 401);
        assert_eq!(
            exp.respond_to(&Method::Get, "/metrics", &["Bearer t0k"]).status_code().0,
            200
        );
        assert_eq!(exp.respond_to(&Method::Get, "/", &[]).status_code().0, 200);
    }

    #[test]
    fn health_reports_last_scrape() {
        let exp = exporter("GPU-A, 0, [Unknown Error], P2\n", None);
        let _ = exp.respond_to(&Method::Get, "/metrics?x=1", &[]);
        let json: serde_json::Value =
            serde_json::from_str(&body(exp.respond_to(&Method::Get, "/health", &[]))).unwrap();
        assert_eq!(json["scrapes"], 1);
        assert_eq!(json["last_scrape_devices"], 1);
        assert_eq!(json["last_scrape_anomalies"], 1);
    }

    #[test]
    fn unknown_paths_and_methods() {
        let exp = exporter("", None);
        assert_eq!(exp.respond_to(&Method::Get, "/nope", &[]).status_code().0, 404);
        assert_eq!(exp.respond_to(&Method::Post, "/metrics", &[]).status_code().0, 405);
        assert_eq!(exp.respond_to(&Method::Post, "/nope", &[]).status_code().0, 404);
        assert_eq!(exp.respond_to(&Method::Head, "/?q=1", &[]).status_code().0, 200);
    }

    #[test]
    fn method_is_checked_before_the_token() {
        let exp = exporter("", Some("t0k"));
        assert_eq!(exp.respond_to(&Method::Delete, "/health", &[]).status_code().0, 405);
        assert_eq!(exp.respond_to(&Method::Head, "/health", &[]).status_code().0, 401);
    }
}

use crate::server::{api, ServerContext};

pub struct HttpResponse {
    pub status_code: u16,
    pub status_text: &'static str,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpResponse {
    pub fn to_http_string(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status_code,
            self.status_text,
            self.content_type,
            self.body.len(),
            self.body
        )
    }
}

pub fn route_request(method: &str, path: &str, ctx: &ServerContext) -> HttpResponse {
    match (method, path) {
        ("GET", "/api/health") => json_or_500(api::health_payload()),
        ("GET", "/api/summary") => json_or_500(api::summary_payload(ctx)),
        ("GET", "/api/histogram") => json_or_500(api::histogram_payload(ctx)),
        _ => error_response(404, "Not Found", &format!("no route for {method} {path}")),
    }
}

fn json_or_500(payload: Result<String, serde_json::Error>) -> HttpResponse {
    match payload {
        Ok(body) => HttpResponse {
            status_code: 200,
            status_text: "OK",
            content_type: "application/json",
            body,
        },
        Err(err) => error_response(500, "Internal Server Error", &err.to_string()),
    }
}

fn error_response(status_code: u16, status_text: &'static str, message: &str) -> HttpResponse {
    let body = serde_json::json!({
        "status": "error",
        "message": message,
    });
    HttpResponse {
        status_code,
        status_text,
        content_type: "application/json",
        body: serde_json::to_string_pretty(&body)
            .unwrap_or_else(|_| r#"{"status":"error"}"#.to_string()),
    }
}

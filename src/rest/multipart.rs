//! `multipart/form-data` body construction for file uploads.

use uuid::Uuid;

/// Incrementally built multipart body with a uuid-prefixed boundary.
#[derive(Debug)]
pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartForm {
    /// Start an empty form.
    #[must_use]
    pub fn new() -> Self {
        Self {
            boundary: format!("{}-boundary", Uuid::new_v4()),
            body: Vec::new(),
        }
    }

    fn open_part(&mut self) {
        if self.body.is_empty() {
            self.body.extend_from_slice(b"--");
        } else {
            self.body.extend_from_slice(b"\r\n--");
        }
        self.body.extend_from_slice(self.boundary.as_bytes());
        self.body.extend_from_slice(b"\r\n");
    }

    /// Append a plain form field.
    pub fn text(&mut self, name: &str, value: &str) -> &mut Self {
        self.open_part();
        self.body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        self.body.extend_from_slice(value.as_bytes());
        self
    }

    /// Append a file part with its own content type.
    pub fn file(
        &mut self,
        name: &str,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> &mut Self {
        self.open_part();
        self.body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                 Content-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self
    }

    /// Terminate the form, returning the `Content-Type` header value and the
    /// finished body.
    #[must_use]
    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.body.extend_from_slice(b"\r\n--");
        self.body.extend_from_slice(self.boundary.as_bytes());
        self.body.extend_from_slice(b"--");
        let content_type = format!("multipart/form-data; boundary={}", self.boundary);
        (content_type, self.body)
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format() {
        let mut form = MultipartForm::new();
        form.text("content", "hello")
            .text("tts", "false")
            .file("file", "a.png", "image/png", b"\x89PNG");
        let boundary = form.boundary.clone();
        let (content_type, body) = form.finish();

        assert_eq!(
            content_type,
            format!("multipart/form-data; boundary={boundary}")
        );

        let body = String::from_utf8_lossy(&body);
        assert!(body.starts_with(&format!("--{boundary}\r\n")));
        assert!(body.contains("Content-Disposition: form-data; name=\"content\"\r\n\r\nhello"));
        assert!(body.contains(&format!("\r\n--{boundary}\r\n")));
        assert!(body.contains(
            "Content-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\n\
             Content-Type: image/png\r\n\r\n"
        ));
        assert!(body.ends_with(&format!("\r\n--{boundary}--")));
    }

    #[test]
    fn boundary_is_uuid_prefixed() {
        let form = MultipartForm::new();
        let uuid_part = form.boundary.strip_suffix("-boundary").unwrap();
        assert!(Uuid::parse_str(uuid_part).is_ok());
    }
}

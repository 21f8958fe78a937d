//! Request metadata handed in by the HTTP layer

/// The parts of an inbound request the cache layer looks at
///
/// Borrowed so the HTTP layer can build one per request without copying.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Query string without the leading `?`
    pub raw_query: &'a str,
    /// Address of the directly connected peer
    pub client_addr: &'a str,
    pub headers: &'a [(&'a str, &'a str)],
    /// Authenticated subject, if the request carried valid credentials
    pub subject_id: Option<&'a str>,
}

impl<'a> RequestContext<'a> {
    #[must_use]
    pub fn new(method: &'a str, path: &'a str) -> Self {
        Self {
            method,
            path,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_query(mut self, raw_query: &'a str) -> Self {
        self.raw_query = raw_query;
        self
    }

    #[must_use]
    pub fn with_client_addr(mut self, client_addr: &'a str) -> Self {
        self.client_addr = client_addr;
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: &'a [(&'a str, &'a str)]) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_subject(mut self, subject_id: &'a str) -> Self {
        self.subject_id = Some(subject_id);
        self
    }

    /// First value of a header, compared case-insensitively
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    /// Authenticated subject, ignoring empty identifiers
    #[must_use]
    pub fn subject(&self) -> Option<&'a str> {
        self.subject_id.filter(|s| !s.is_empty())
    }
}

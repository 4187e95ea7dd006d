use anyhow::Result;
use regex::Regex;

/// Rewrites self-hosted uploads image URLs so they point at the bucket
/// domain. Only the scheme and path survive; whatever host the URL carried
/// is replaced wholesale.
pub struct Rewriter {
    pattern: Regex,
    target_domain: String,
}

impl Rewriter {
    pub fn new(target_domain: &str) -> Result<Self> {
        // Lazy path capture so the match ends at the first image extension;
        // extension set and case are fixed by the historical upload rules
        // (no query strings, no uppercase variants).
        let pattern =
            Regex::new(r"(https?://)[^/]+(/wp-content/uploads/.+?\.(?:png|gif|jpg|jpeg))")?;
        Ok(Self {
            pattern,
            target_domain: target_domain.to_string(),
        })
    }

    /// Replace every uploads URL in `text`, left to right. Non-matching
    /// input comes back unchanged.
    pub fn rewrite(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for caps in self.pattern.captures_iter(text) {
            let whole = match caps.get(0) {
                Some(m) => m,
                None => continue,
            };
            let scheme = caps.get(1).map(|m| m.as_str()).unwrap_or("http://");
            let path = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            out.push_str(&text[cursor..whole.start()]);
            out.push_str(scheme);
            out.push_str(&self.target_domain);
            out.push_str(path);
            cursor = whole.end();
        }
        if cursor == 0 {
            return text.to_string();
        }
        out.push_str(&text[cursor..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::Rewriter;

    fn rw(domain: &str) -> Rewriter {
        Rewriter::new(domain).unwrap()
    }

    #[test]
    fn rewrites_host_keeping_scheme_and_path() {
        let r = rw("s3-eu-west-1.amazonaws.com/testbucket");
        assert_eq!(
            r.rewrite("http://blog.example.com/wp-content/uploads/2014/03/cat.png"),
            "http://s3-eu-west-1.amazonaws.com/testbucket/wp-content/uploads/2014/03/cat.png"
        );
    }

    #[test]
    fn preserves_https_scheme() {
        let r = rw("s3.example.net/bucket");
        assert_eq!(
            r.rewrite("https://old.example.com/wp-content/uploads/a.jpg"),
            "https://s3.example.net/bucket/wp-content/uploads/a.jpg"
        );
    }

    #[test]
    fn rewrites_multiple_urls_in_one_text() {
        let r = rw("cdn.example.org/b");
        let input = "<img src=\"http://a.com/wp-content/uploads/x.png\"> and \
                     <img src=\"https://b.com/wp-content/uploads/y.gif\">";
        let out = r.rewrite(input);
        assert_eq!(
            out,
            "<img src=\"http://cdn.example.org/b/wp-content/uploads/x.png\"> and \
             <img src=\"https://cdn.example.org/b/wp-content/uploads/y.gif\">"
        );
    }

    #[test]
    fn target_longer_than_source_host() {
        // Replacement handles length changes in either direction.
        let r = rw("a-very-long-bucket-host.example.com/bucket-name");
        let out = r.rewrite("x http://s.co/wp-content/uploads/i.jpeg y");
        assert_eq!(
            out,
            "x http://a-very-long-bucket-host.example.com/bucket-name/wp-content/uploads/i.jpeg y"
        );
    }

    #[test]
    fn lazy_match_stops_at_first_extension() {
        let r = rw("s3.example.com/b");
        // ".png.bak" must not extend the match past ".png".
        assert_eq!(
            r.rewrite("http://h.com/wp-content/uploads/a.png.bak"),
            "http://s3.example.com/b/wp-content/uploads/a.png.bak"
        );
    }

    #[test]
    fn ignores_non_upload_urls() {
        let r = rw("s3.example.com/b");
        for text in [
            "http://example.com/other/cat.png",
            "http://example.com/wp-content/uploads/doc.pdf",
            "ftp://example.com/wp-content/uploads/cat.png",
            "no urls here",
            "",
        ] {
            assert_eq!(r.rewrite(text), text);
        }
    }

    #[test]
    fn query_string_survives_outside_the_match() {
        let r = rw("s3.example.com/b");
        assert_eq!(
            r.rewrite("http://h.com/wp-content/uploads/a.png?w=300"),
            "http://s3.example.com/b/wp-content/uploads/a.png?w=300"
        );
    }

    #[test]
    fn ignores_uppercase_extensions() {
        let r = rw("s3.example.com/b");
        let text = "http://example.com/wp-content/uploads/cat.PNG";
        assert_eq!(r.rewrite(text), text);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let r = rw("s3-eu-west-1.amazonaws.com/testbucket");
        let once = r.rewrite("http://blog.example.com/wp-content/uploads/2014/03/cat.png");
        assert_eq!(r.rewrite(&once), once);
    }
}

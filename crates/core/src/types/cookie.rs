use std::fmt;

pub const CSRF_COOKIE: &str = "bili_jct";

/// Ordered `name=value` pairs of a credential string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    pairs: Vec<(String, String)>,
}

impl CookieJar {
    pub fn parse(raw: &str) -> Self {
        let mut jar = CookieJar::default();
        for part in raw.split(';') {
            if let Some((name, value)) = parse_pair(part) {
                jar.set(name, value);
            }
        }
        jar
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set(&mut self, name: &str, value: &str) {
        match self.pairs.iter_mut().find(|(key, _)| key == name) {
            Some(pair) => pair.1 = value.to_string(),
            None => self.pairs.push((name.to_string(), value.to_string())),
        }
    }

    /// Applies `Set-Cookie` header values, returning how many pairs changed.
    pub fn merge_set_cookie<'a, I>(&mut self, headers: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut changed = 0;
        for header in headers {
            let Some(first) = header.split(';').next() else {
                continue;
            };
            let Some((name, value)) = parse_pair(first) else {
                continue;
            };
            if self.get(name) != Some(value) {
                self.set(name, value);
                changed += 1;
            }
        }
        changed
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.get(CSRF_COOKIE).filter(|value| !value.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl fmt::Display for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (name, value)) in self.pairs.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

fn parse_pair(part: &str) -> Option<(&str, &str)> {
    let (name, value) = part.trim().split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::CookieJar;

    #[test]
    fn parse_extracts_csrf() {
        let jar = CookieJar::parse("SESSDATA=abc; bili_jct=csrf123; DedeUserID=42");
        assert_eq!(jar.csrf_token(), Some("csrf123"));
        assert_eq!(jar.get("DedeUserID"), Some("42"));
    }

    #[test]
    fn empty_csrf_is_absent() {
        let jar = CookieJar::parse("SESSDATA=abc; bili_jct=");
        assert_eq!(jar.csrf_token(), None);
    }

    #[test]
    fn merge_overrides_and_appends() {
        let mut jar = CookieJar::parse("SESSDATA=old; bili_jct=old_csrf");
        let changed = jar.merge_set_cookie([
            "SESSDATA=new; Path=/; Domain=.bilibili.com; HttpOnly",
            "bili_jct=new_csrf; Path=/",
            "sid=xyz; Path=/",
        ]);
        assert_eq!(changed, 3);
        assert_eq!(jar.to_string(), "SESSDATA=new; bili_jct=new_csrf; sid=xyz");
    }

    #[test]
    fn merge_ignores_unchanged_pairs() {
        let mut jar = CookieJar::parse("a=1");
        assert_eq!(jar.merge_set_cookie(["a=1; Path=/", "garbage"]), 0);
    }

    #[test]
    fn display_roundtrips_through_parse() {
        let raw = "a=1; b=2; c=x=y";
        let jar = CookieJar::parse(raw);
        assert_eq!(jar.get("c"), Some("x=y"));
        assert_eq!(CookieJar::parse(&jar.to_string()), jar);
    }
}

// Low-level HTML string helpers for the country table extractor.
// Naive on purpose: tag and attribute names are matched case-insensitively on
// ASCII, there is no DOM. Enough for a static page with one well-formed table.

/// ASCII-only lowercase; byte offsets stay aligned with the source
pub fn to_lower(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii() { c.to_ascii_lowercase() } else { c })
        .collect()
}

/// A document plus its lowercased copy, so repeated scans lowercase once
pub struct TagScanner<'a> {
    src: &'a str,
    lc: String,
}

impl<'a> TagScanner<'a> {
    pub fn new(src: &'a str) -> Self {
        TagScanner {
            src,
            lc: to_lower(src),
        }
    }

    pub fn source(&self) -> &'a str {
        self.src
    }

    /// Next `<name ...>` at or after `from`; `<tr` does not match `<track`
    pub fn find_open(&self, name: &str, from: usize) -> Option<usize> {
        let pat = format!("<{}", to_lower(name));
        let mut pos = from;
        loop {
            let start = self.lc.get(pos..)?.find(&pat)? + pos;
            let next = self.lc[start + pat.len()..].chars().next();
            match next {
                Some(c) if c == '>' || c == '/' || c.is_ascii_whitespace() => return Some(start),
                None => return None,
                _ => pos = start + pat.len(),
            }
        }
    }

    /// Next complete `<name ...>...</name>` block from `from`: (start, end)
    ///
    /// A missing close tag ends the block where `stop` (if any) next opens,
    /// else at the end of the document.
    pub fn next_block(&self, name: &str, from: usize, stop: &[&str]) -> Option<(usize, usize)> {
        let start = self.find_open(name, from)?;
        let open_end = self.src[start..].find('>')? + start + 1;
        let close = format!("</{}>", to_lower(name));

        let mut end = self.lc[open_end..]
            .find(&close)
            .map(|rel| open_end + rel + close.len());

        let next_stop = stop
            .iter()
            .filter_map(|s| self.find_open(s, open_end))
            .min();

        end = match (end, next_stop) {
            (Some(e), Some(s)) if s < e - close.len() => Some(s),
            (Some(e), _) => Some(e),
            (None, Some(s)) => Some(s),
            (None, None) => Some(self.src.len()),
        };

        end.map(|e| (start, e))
    }

    /// Opening tag text (`<table class="x">`) of the block starting at `start`
    pub fn open_tag(&self, start: usize) -> Option<&'a str> {
        let end = self.src[start..].find('>')? + start + 1;
        Some(&self.src[start..end])
    }
}

/// Given `<td ...>INNER</td>` return INNER (may still hold nested tags)
///
/// Tolerates a missing close tag.
pub fn inner_after_open_tag(block: &str) -> &str {
    let Some(open_end) = block.find('>') else {
        return "";
    };
    let rest = &block[open_end + 1..];
    match rest.rfind("</") {
        Some(close_start) => &rest[..close_start],
        None => rest,
    }
}

/// Does an opening tag carry `class` among its class names?
pub fn has_class(open_tag: &str, class: &str) -> bool {
    let lc = to_lower(open_tag);
    let Some(idx) = lc.find("class") else {
        return false;
    };
    let rest = &open_tag[idx + 5..];
    let rest = rest.trim_start().strip_prefix('=').unwrap_or(rest).trim_start();

    let value = match rest.chars().next() {
        Some(q @ ('"' | '\'')) => rest[1..].split(q).next().unwrap_or(""),
        _ => rest
            .split(|c: char| c.is_ascii_whitespace() || c == '>')
            .next()
            .unwrap_or(""),
    };

    value
        .split_ascii_whitespace()
        .any(|c| c.eq_ignore_ascii_case(class))
}

/// Remove tags, `<sup>` footnote markers included
pub fn strip_tags(s: &str) -> String {
    let scanner = TagScanner::new(s);
    let mut without_sup = String::with_capacity(s.len());
    let mut pos = 0;
    while let Some((start, end)) = scanner.next_block("sup", pos, &[]) {
        without_sup.push_str(&s[pos..start]);
        pos = end;
    }
    without_sup.push_str(&s[pos..]);

    let mut out = String::with_capacity(without_sup.len());
    let mut in_tag = false;
    for ch in without_sup.chars() {
        match ch {
            '<' => {
                in_tag = true;
                // Keep words in neighbouring cells/lines apart
                out.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Named (full HTML5 set), decimal and hex references; unknown ones stay literal
pub fn decode_entities(s: &str) -> String {
    html_escape::decode_html_entities(s).into_owned()
}

/// Drop `[1]`, `[a]`, `[note 3]` style markers
pub fn remove_footnotes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(open) = rest.find('[') {
        match rest[open..].find(']') {
            Some(close) if close <= 12 => {
                out.push_str(&rest[..open]);
                rest = &rest[open + close + 1..];
            }
            _ => {
                out.push_str(&rest[..=open]);
                rest = &rest[open + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cell text: tags stripped, entities decoded, footnotes removed, whitespace collapsed
pub fn cell_text(inner_html: &str) -> String {
    normalize_ws(&remove_footnotes(&decode_entities(&strip_tags(inner_html))))
}

/// Leading number of a cell, thousands separators removed ("1,234.5 km2" → 1234.5)
pub fn parse_number(text: &str) -> Option<f64> {
    let compact: String = text
        .chars()
        .filter(|c| !matches!(c, ',' | '\u{a0}' | '\u{202f}' | '_') && !c.is_whitespace())
        .collect();

    let numeric: String = compact
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    if !numeric.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    numeric.parse::<f64>().ok()
}

pub fn parse_integer(text: &str) -> Option<i64> {
    parse_number(text)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_block_case_insensitive() {
        let html = "<TABLE><TR><TD>a</TD></TR></TABLE>";
        let scanner = TagScanner::new(html);

        let (start, end) = scanner.next_block("td", 0, &[]).unwrap();
        assert_eq!(&html[start..end], "<TD>a</TD>");
        assert_eq!(inner_after_open_tag(&html[start..end]), "a");
    }

    #[test]
    fn test_open_tag_prefix_is_not_a_match() {
        let scanner = TagScanner::new("<track src=x><tr><td>1</td></tr>");
        let start = scanner.find_open("tr", 0).unwrap();
        assert_eq!(scanner.open_tag(start), Some("<tr>"));
    }

    #[test]
    fn test_unclosed_cells_end_at_next_cell() {
        let html = "<tr><td>France<td>Paris</tr>";
        let scanner = TagScanner::new(html);

        let (s1, e1) = scanner.next_block("td", 0, &["td", "th"]).unwrap();
        assert_eq!(cell_text(inner_after_open_tag(&html[s1..e1])), "France");

        let (s2, e2) = scanner.next_block("td", e1, &["td", "th"]).unwrap();
        assert_eq!(cell_text(inner_after_open_tag(&html[s2..e2])), "Paris");
    }

    #[test]
    fn test_has_class() {
        assert!(has_class(r#"<table class="wikitable sortable">"#, "wikitable"));
        assert!(has_class("<table class=wikitable>", "WIKITABLE"));
        assert!(!has_class(r#"<table class="infobox">"#, "wikitable"));
        assert!(!has_class("<table>", "wikitable"));
    }

    #[test]
    fn test_cell_text_cleaning() {
        let inner = r#"<a href="/wiki/CI">C&ocirc;te d&#8217;Ivoire</a><sup class="reference">[4]</sup>"#;
        assert_eq!(cell_text(inner), "C\u{f4}te d\u{2019}Ivoire");

        assert_eq!(cell_text("Tokyo&nbsp;[a]"), "Tokyo");
        assert_eq!(cell_text("<b>Paris</b>\n<br/>(seat)"), "Paris (seat)");
    }

    #[test]
    fn test_decode_named_and_numeric_entities() {
        assert_eq!(
            decode_entities("S&atilde;o Tom&eacute; and Pr&iacute;ncipe"),
            "S\u{e3}o Tom\u{e9} and Pr\u{ed}ncipe"
        );
        assert_eq!(decode_entities("d&#39;Ivoire &amp; d&#x2019;Or"), "d'Ivoire & d\u{2019}Or");
        assert_eq!(decode_entities("R&D &zzqq;"), "R&D &zzqq;");
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_integer("331,449,281"), Some(331_449_281));
        assert_eq!(parse_integer("1 234 567"), Some(1_234_567));
        assert_eq!(parse_number("9,833,520 km2"), Some(9_833_520.0));
        assert_eq!(parse_number("0.44"), Some(0.44));
        assert_eq!(parse_number("n/a"), None);
        assert_eq!(parse_integer(""), None);
    }
}

use liso::http::parser::{find_headers_end, parse_http_request, ParseError};
use liso::http::request::Method;

#[test]
fn test_parse_simple_get_request() {
    let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let (parsed, consumed) = parse_http_request(req).unwrap();

    assert_eq!(parsed.method, Method::GET);
    assert_eq!(parsed.uri, "/");
    assert_eq!(parsed.version, "HTTP/1.1");
    assert_eq!(parsed.header("Host"), Some("example.com"));
    assert_eq!(consumed, req.len());
}

#[test]
fn test_parse_post_request_with_body() {
    let req = b"POST /api HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
    let (parsed, consumed) = parse_http_request(req).unwrap();

    assert_eq!(parsed.method, Method::POST);
    assert_eq!(parsed.uri, "/api");
    assert_eq!(&parsed.body[..], b"hello");
    assert_eq!(consumed, req.len());
}

#[test]
fn test_parse_header_count_and_order() {
    let req = b"GET /path HTTP/1.1\r\nHost: example.com\r\nUser-Agent: test-client\r\nAccept: */*\r\n\r\n";
    let (parsed, _) = parse_http_request(req).unwrap();

    assert_eq!(parsed.headers.len(), 3);
    assert_eq!(parsed.headers[0], ("Host".to_string(), "example.com".to_string()));
    assert_eq!(parsed.headers[2], ("Accept".to_string(), "*/*".to_string()));
}

#[test]
fn test_parse_keeps_query_in_uri() {
    let req = b"GET /search?q=rust HTTP/1.1\r\n\r\n";
    let (parsed, _) = parse_http_request(req).unwrap();

    assert_eq!(parsed.uri, "/search?q=rust");
    assert_eq!(parsed.path(), "/search");
    assert_eq!(parsed.query(), "q=rust");
}

#[test]
fn test_parse_header_value_whitespace_trimmed() {
    let req = b"GET / HTTP/1.1\r\nX-Padded: \t value \t\r\n\r\n";
    let (parsed, _) = parse_http_request(req).unwrap();

    assert_eq!(parsed.header("X-Padded"), Some("value"));
}

#[test]
fn test_parse_incomplete_request_missing_blank_line() {
    let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n";
    assert_eq!(parse_http_request(req).unwrap_err(), ParseError::Incomplete);
}

#[test]
fn test_parse_incomplete_request_partial_body() {
    let req = b"POST /api HTTP/1.1\r\nContent-Length: 10\r\n\r\nhello";
    assert_eq!(parse_http_request(req).unwrap_err(), ParseError::Incomplete);
}

#[test]
fn test_parse_every_prefix_is_incomplete() {
    let req = b"GET /index.html HTTP/1.1\r\nHost: a\r\n\r\n";
    for end in 0..req.len() {
        assert_eq!(
            parse_http_request(&req[..end]).unwrap_err(),
            ParseError::Incomplete,
            "prefix of {end} bytes"
        );
    }
}

#[test]
fn test_parse_bare_lf_terminator_is_not_accepted() {
    let req = b"GET / HTTP/1.1\nHost: a\n\n";
    assert_eq!(parse_http_request(req).unwrap_err(), ParseError::Incomplete);
}

#[test]
fn test_parse_pipelined_requests() {
    let req = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
    let (first, consumed) = parse_http_request(req).unwrap();
    let (second, rest) = parse_http_request(&req[consumed..]).unwrap();

    assert_eq!(first.uri, "/a");
    assert_eq!(second.uri, "/b");
    assert_eq!(consumed + rest, req.len());
}

#[test]
fn test_parse_body_does_not_swallow_next_request() {
    let req = b"POST /up HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET / HTTP/1.1\r\n\r\n";
    let (parsed, consumed) = parse_http_request(req).unwrap();

    assert_eq!(&parsed.body[..], b"abc");
    assert_eq!(&req[consumed..], b"GET / HTTP/1.1\r\n\r\n");
}

#[test]
fn test_parse_invalid_request_line() {
    let cases: &[&[u8]] = &[
        b"GET /\r\n\r\n",
        b"GET / HTTP/1.1 extra\r\n\r\n",
        b"GET  / HTTP/1.1\r\n\r\n",
        b"G(T / HTTP/1.1\r\n\r\n",
        b"GET / FTP/1.1\r\n\r\n",
    ];
    for case in cases {
        assert_eq!(
            parse_http_request(case).unwrap_err(),
            ParseError::InvalidRequestLine,
            "{}",
            String::from_utf8_lossy(case)
        );
    }
}

#[test]
fn test_parse_invalid_header() {
    let req = b"GET / HTTP/1.1\r\nNoColonHere\r\n\r\n";
    assert_eq!(parse_http_request(req).unwrap_err(), ParseError::InvalidHeader);

    let req = b"GET / HTTP/1.1\r\nBad Name: x\r\n\r\n";
    assert_eq!(parse_http_request(req).unwrap_err(), ParseError::InvalidHeader);
}

#[test]
fn test_parse_invalid_content_length() {
    let req = b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n";
    assert_eq!(
        parse_http_request(req).unwrap_err(),
        ParseError::InvalidContentLength
    );

    let req = b"POST / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\nab";
    assert_eq!(
        parse_http_request(req).unwrap_err(),
        ParseError::InvalidContentLength
    );
}

#[test]
fn test_parse_content_length_is_case_sensitive() {
    let req = b"POST / HTTP/1.1\r\ncontent-length: 5\r\n\r\n";
    let (parsed, consumed) = parse_http_request(req).unwrap();

    assert!(parsed.body.is_empty());
    assert_eq!(parsed.content_length(), None);
    assert_eq!(consumed, req.len());
}

#[test]
fn test_parse_other_versions_tokenize() {
    let (parsed, _) = parse_http_request(b"GET / HTTP/1.0\r\n\r\n").unwrap();
    assert_eq!(parsed.version, "HTTP/1.0");
}

#[test]
fn test_find_headers_end() {
    assert_eq!(find_headers_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(18));
    assert_eq!(find_headers_end(b"\r\n\r\n"), Some(4));
    assert_eq!(find_headers_end(b"\r\r\n\r\n"), Some(5));
    assert_eq!(find_headers_end(b"GET / HTTP/1.1\r\n"), None);
    assert_eq!(find_headers_end(b""), None);
}

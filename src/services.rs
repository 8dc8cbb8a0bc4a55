/// Well-known TCP ports and their conventional service names, sorted by port.
const COMMON_PORTS: &[(u16, &str)] = &[
    (20, "ftp-data"),
    (21, "ftp"),
    (22, "ssh"),
    (23, "telnet"),
    (25, "smtp"),
    (53, "dns"),
    (80, "http"),
    (110, "pop3"),
    (111, "rpcbind"),
    (135, "msrpc"),
    (139, "netbios-ssn"),
    (143, "imap"),
    (443, "https"),
    (445, "microsoft-ds"),
    (993, "imaps"),
    (995, "pop3s"),
    (1723, "pptp"),
    (3306, "mysql"),
    (3389, "ms-wbt-server"),
    (5432, "postgresql"),
    (5900, "vnc"),
    (6379, "redis"),
    (8080, "http-proxy"),
    (8443, "https-alt"),
    (27017, "mongodb"),
];

/// Best-guess service name for `port`, if it is a well-known one.
pub fn lookup(port: u16) -> Option<&'static str> {
    COMMON_PORTS
        .binary_search_by_key(&port, |&(p, _)| p)
        .ok()
        .map(|i| COMMON_PORTS[i].1)
}

//! Pure NGINX server-block generation.
//!
//! Every function here takes its inputs as plain data plus injected probe
//! closures, so the branch logic can be exercised without touching the
//! filesystem, DNS, or a real nginx binary. Filesystem extraction of the
//! packaged base config lives in [`assets`]; the actual reconciliation
//! sequencing (render -> validate -> reload) lives in `crate::reloader`.

pub mod assets;

use crate::db::models::ProxyEntry;

const CONNECT_TIMEOUT: &str = "5s";
const RW_TIMEOUT: &str = "60s";

/// Host/DNS probes a caller injects so generation stays pure.
pub struct Probes<'a> {
    pub has_cert: &'a dyn Fn(&str) -> bool,
    pub upstream_resolvable: &'a dyn Fn(&str) -> bool,
}

/// Strip a leading wildcard label, drop empties. `*.example.com` becomes
/// `example.com`; nginx `server_name` entries carry the wildcard form
/// separately where needed, but cert/ACME lookups always use the apex.
fn normalize_domains(raw: &str) -> Vec<String> {
    crate::domain::parse(raw)
        .into_iter()
        .map(|d| d.strip_prefix("*.").map(str::to_string).unwrap_or(d))
        .filter(|d| !d.is_empty())
        .collect()
}

fn server_names(domains: &[String]) -> String {
    domains.join(" ")
}

fn cert_paths(letsencrypt_dir: &str, primary: &str) -> (String, String) {
    (
        format!("{}/live/{}/fullchain.pem", letsencrypt_dir, primary),
        format!("{}/live/{}/privkey.pem", letsencrypt_dir, primary),
    )
}

fn proxy_common_directives(custom_code: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str("        proxy_set_header Host $host;\n");
    out.push_str("        proxy_set_header X-Real-IP $remote_addr;\n");
    out.push_str("        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n");
    out.push_str("        proxy_set_header X-Forwarded-Proto $scheme;\n");
    out.push_str("        proxy_set_header X-Forwarded-Host $host;\n");
    out.push_str("        proxy_set_header X-Forwarded-Port $server_port;\n");
    out.push_str(
        "        proxy_set_header Forwarded \"for=$remote_addr;host=$host;proto=$scheme\";\n",
    );
    out.push_str("        proxy_set_header CF-Connecting-IP $http_cf_connecting_ip;\n");
    out.push_str("        proxy_set_header CF-IPCountry $http_cf_ipcountry;\n");
    out.push_str("        proxy_set_header CF-Ray $http_cf_ray;\n");
    out.push_str("        proxy_set_header True-Client-IP $http_true_client_ip;\n");
    out.push_str("        proxy_http_version 1.1;\n");
    out.push_str("        proxy_set_header Upgrade $http_upgrade;\n");
    out.push_str("        proxy_set_header Connection \"upgrade\";\n");
    out.push_str(&format!("        proxy_connect_timeout {};\n", CONNECT_TIMEOUT));
    out.push_str(&format!("        proxy_send_timeout {};\n", RW_TIMEOUT));
    out.push_str(&format!("        proxy_read_timeout {};\n", RW_TIMEOUT));
    if let Some(code) = custom_code {
        out.push('\n');
        out.push_str(code);
        out.push('\n');
    }
    out
}

/// `upstream` may already be a full URL; only prepend a scheme when it
/// doesn't carry one, so `proxy_pass` never doubles up (`http://https://`).
fn proxy_pass_target(upstream: &str) -> String {
    if upstream.contains("://") {
        upstream.to_string()
    } else {
        format!("http://{}", upstream)
    }
}

fn acme_challenge_location(admin_port: u16) -> String {
    format!(
        "    location /.well-known/acme-challenge/ {{\n        proxy_pass http://127.0.0.1:{};\n    }}\n",
        admin_port,
    )
}

fn render_proxy(
    entry: &ProxyEntry,
    domains: &[String],
    letsencrypt_dir: &str,
    admin_port: u16,
    has_cert: bool,
) -> String {
    let names = server_names(domains);
    let primary = &domains[0];
    let upstream = proxy_pass_target(&entry.upstream);

    if !has_cert {
        return format!(
            "server {{\n    listen 80;\n    server_name {names};\n\n{}\n    location / {{\n        proxy_pass {upstream};\n{directives}    }}\n}}\n",
            acme_challenge_location(admin_port),
            names = names,
            upstream = upstream,
            directives = proxy_common_directives(entry.nginx_custom_code.as_deref()),
        );
    }

    let (cert, key) = cert_paths(letsencrypt_dir, primary);
    format!(
        "server {{\n    listen 80;\n    server_name {names};\n\n{acme}    location / {{\n        return 301 https://$host$request_uri;\n    }}\n}}\n\nserver {{\n    listen 443 ssl http2;\n    server_name {names};\n\n    ssl_certificate {cert};\n    ssl_certificate_key {key};\n    include /etc/nginx/ssl/ssl-params.conf;\n\n    location / {{\n        proxy_pass {upstream};\n{directives}    }}\n}}\n",
        acme = acme_challenge_location(admin_port),
        names = names,
        cert = cert,
        key = key,
        upstream = upstream,
        directives = proxy_common_directives(entry.nginx_custom_code.as_deref()),
    )
}

fn render_redirect(
    entry: &ProxyEntry,
    domains: &[String],
    letsencrypt_dir: &str,
    admin_port: u16,
    has_cert: bool,
) -> String {
    let names = server_names(domains);
    let primary = &domains[0];
    let target = &entry.upstream;

    if !has_cert {
        return format!(
            "server {{\n    listen 80;\n    server_name {names};\n\n{acme}    location / {{\n        return 301 {target}$request_uri;\n    }}\n}}\n",
            acme = acme_challenge_location(admin_port),
            names = names,
            target = target,
        );
    }

    let (cert, key) = cert_paths(letsencrypt_dir, primary);
    format!(
        "server {{\n    listen 80;\n    server_name {names};\n\n{acme}    location / {{\n        return 301 https://$host$request_uri;\n    }}\n}}\n\nserver {{\n    listen 443 ssl http2;\n    server_name {names};\n\n    ssl_certificate {cert};\n    ssl_certificate_key {key};\n    include /etc/nginx/ssl/ssl-params.conf;\n\n    location / {{\n        return 301 {target}$request_uri;\n    }}\n}}\n",
        acme = acme_challenge_location(admin_port),
        names = names,
        cert = cert,
        key = key,
        target = target,
    )
}

fn render_unresolvable(domains: &[String]) -> String {
    let names = server_names(domains);
    format!(
        "server {{\n    listen 80;\n    server_name {names};\n\n    location / {{\n        return 503 \"upstream unresolvable\";\n    }}\n}}\n",
        names = names,
    )
}

/// Render the full `conf.d/<id>.conf` body for one entry. Returns `None`
/// when the entry has no usable domains left after normalization (the
/// reconciler skips writing a file in that case).
pub fn render_entry(
    entry: &ProxyEntry,
    letsencrypt_dir: &str,
    admin_port: u16,
    probes: &Probes,
) -> Option<String> {
    let domains = normalize_domains(&entry.domains);
    if domains.is_empty() {
        return None;
    }

    if !(probes.upstream_resolvable)(&entry.upstream) {
        return Some(render_unresolvable(&domains));
    }

    let has_cert = entry.ssl && (probes.has_cert)(&domains[0]);

    if entry.is_redirect() {
        Some(render_redirect(entry, &domains, letsencrypt_dir, admin_port, has_cert))
    } else {
        Some(render_proxy(entry, &domains, letsencrypt_dir, admin_port, has_cert))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(domains: &str, upstream: &str, entry_type: &str, ssl: bool, custom: Option<&str>) -> ProxyEntry {
        let now = Utc::now();
        ProxyEntry {
            id: "e1".into(),
            domains: domains.into(),
            upstream: upstream.into(),
            entry_type: entry_type.into(),
            ssl,
            nginx_custom_code: custom.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn single_http_proxy_has_exactly_one_server_block() {
        let e = entry("example.com", "app:8080", "PROXY", false, None);
        let probes = Probes {
            has_cert: &|_| false,
            upstream_resolvable: &|_| true,
        };
        let rendered = render_entry(&e, "/etc/letsencrypt", 3000, &probes).unwrap();
        assert_eq!(rendered.matches("server {").count(), 1);
        assert!(rendered.contains("listen 80;"));
        assert!(rendered.contains("server_name example.com;"));
        assert!(rendered.contains("proxy_pass http://app:8080;"));
        assert!(rendered.contains("proxy_pass http://127.0.0.1:3000;"));
        assert!(!rendered.contains("$proxyctl_admin_port"));
        assert!(rendered.contains("proxy_set_header X-Forwarded-Host $host;"));
        assert!(rendered.contains("proxy_set_header X-Forwarded-Port $server_port;"));
        assert!(rendered.contains("proxy_set_header Forwarded "));
        assert!(rendered.contains("proxy_set_header CF-Connecting-IP $http_cf_connecting_ip;"));
        assert!(rendered.contains("proxy_set_header True-Client-IP $http_true_client_ip;"));
    }

    #[test]
    fn full_url_upstream_is_not_double_prefixed() {
        let e = entry("example.com", "https://backend:8443", "PROXY", false, None);
        let probes = Probes {
            has_cert: &|_| false,
            upstream_resolvable: &|_| true,
        };
        let rendered = render_entry(&e, "/etc/letsencrypt", 3000, &probes).unwrap();
        assert!(rendered.contains("proxy_pass https://backend:8443;"));
        assert!(!rendered.contains("http://https://"));
    }

    #[test]
    fn https_pair_emitted_when_cert_present() {
        let e = entry("example.com", "app:8080", "PROXY", true, None);
        let probes = Probes {
            has_cert: &|_| true,
            upstream_resolvable: &|_| true,
        };
        let rendered = render_entry(&e, "/etc/letsencrypt", 3000, &probes).unwrap();
        assert_eq!(rendered.matches("server {").count(), 2);
        assert!(rendered.contains("listen 443 ssl http2;"));
        assert!(rendered.contains("ssl_certificate /etc/letsencrypt/live/example.com/fullchain.pem;"));
        assert!(rendered.contains("return 301 https://$host$request_uri;"));
    }

    #[test]
    fn redirect_type_emits_301() {
        let e = entry("old.example.com", "https://new.example.com", "REDIRECT", false, None);
        let probes = Probes {
            has_cert: &|_| false,
            upstream_resolvable: &|_| true,
        };
        let rendered = render_entry(&e, "/etc/letsencrypt", 3000, &probes).unwrap();
        assert_eq!(rendered.matches("server {").count(), 1);
        assert!(rendered.contains("return 301 https://new.example.com$request_uri;"));
    }

    #[test]
    fn custom_code_injected_verbatim() {
        let e = entry(
            "example.com",
            "app:8080",
            "PROXY",
            false,
            Some("        add_header X-Custom foo;"),
        );
        let probes = Probes {
            has_cert: &|_| false,
            upstream_resolvable: &|_| true,
        };
        let rendered = render_entry(&e, "/etc/letsencrypt", 3000, &probes).unwrap();
        assert!(rendered.contains("add_header X-Custom foo;"));
    }

    #[test]
    fn unresolvable_upstream_falls_back_to_503() {
        let e = entry("example.com", "ghost:9999", "PROXY", false, None);
        let probes = Probes {
            has_cert: &|_| false,
            upstream_resolvable: &|_| false,
        };
        let rendered = render_entry(&e, "/etc/letsencrypt", 3000, &probes).unwrap();
        assert_eq!(rendered.matches("server {").count(), 1);
        assert!(rendered.contains("return 503"));
        assert!(!rendered.contains("proxy_pass"));
    }

    #[test]
    fn no_domains_renders_nothing() {
        let e = entry("", "app:8080", "PROXY", false, None);
        let probes = Probes {
            has_cert: &|_| false,
            upstream_resolvable: &|_| true,
        };
        assert!(render_entry(&e, "/etc/letsencrypt", 3000, &probes).is_none());
    }

    #[test]
    fn wildcard_domain_normalized_to_apex_for_cert_lookup() {
        let e = entry("*.example.com", "app:8080", "PROXY", true, None);
        let probes = Probes {
            has_cert: &|d| d == "example.com",
            upstream_resolvable: &|_| true,
        };
        let rendered = render_entry(&e, "/etc/letsencrypt", 3000, &probes).unwrap();
        assert!(rendered.contains("server_name example.com;"));
        assert!(rendered.contains("live/example.com/fullchain.pem"));
    }
}

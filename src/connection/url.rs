use anyhow::Result;

use crate::connection::cipher::ConnectionCipher;
use crate::connection::ConnectionDescriptor;

/// Builds the GET-callable URL of a published query:
/// `/api/sql/<table>?connectionInfo=..&query=..[&apiId=..]`.
pub fn generate_sql_api_url(
    cipher: &ConnectionCipher,
    connection: &ConnectionDescriptor,
    sql_query: &str,
    table_name: Option<&str>,
    api_id: Option<&str>,
) -> Result<String> {
    let table_name = table_name.unwrap_or("query").replace(';', "");

    let mut connection = connection.clone();
    if connection.port.trim().is_empty() {
        connection.port = connection.engine_type.default_port().to_string();
    }
    connection.validate()?;

    tracing::debug!("Encrypting connection info: {:?}", connection);
    let encrypted = cipher.encrypt_json(&serde_json::to_string(&connection)?)?;

    let mut url = format!(
        "/api/sql/{}?connectionInfo={}",
        table_name,
        urlencoding::encode(&encrypted)
    );
    if !sql_query.is_empty() {
        url.push_str("&query=");
        url.push_str(&urlencoding::encode(sql_query));
    }
    if let Some(id) = api_id.filter(|id| !id.is_empty()) {
        url.push_str("&apiId=");
        url.push_str(id);
    }
    Ok(url)
}

pub fn generate_curl_command(url: &str) -> String {
    format!("curl -X GET \"{}\"", url)
}

/// Path part of a URL, without query string.
pub fn url_path(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Lowercased path of `url` without query string or trailing `;` / `/`,
/// always starting with `/`. Two URLs address the same API when these match.
pub fn normalize_path_for_match(url: &str) -> String {
    let mut path = url_path(url);
    path = path.strip_suffix(';').unwrap_or(path);
    path = path.strip_suffix('/').unwrap_or(path);
    let mut out = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    out.make_ascii_lowercase();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::derive_key;
    use crate::connection::Engine;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            engine_type: Engine::MySql,
            host: "localhost".into(),
            port: String::new(),
            username: "root".into(),
            password: "pw".into(),
            database: "shop".into(),
            encrypt: None,
        }
    }

    fn query_param(url: &str, name: &str) -> Option<String> {
        let query = url.split_once('?')?.1;
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name).then(|| urlencoding::decode(value).unwrap().into_owned())
        })
    }

    #[test]
    fn test_url_carries_encrypted_descriptor() {
        let cipher = ConnectionCipher::new(derive_key("k"));
        let url = generate_sql_api_url(&cipher, &descriptor(), "SELECT * FROM users", Some("users;"), Some("abc"))
            .unwrap();

        assert!(url.starts_with("/api/sql/users?connectionInfo="));
        assert_eq!(query_param(&url, "query").as_deref(), Some("SELECT * FROM users"));
        assert_eq!(query_param(&url, "apiId").as_deref(), Some("abc"));

        let blob = query_param(&url, "connectionInfo").unwrap();
        let decrypted: ConnectionDescriptor = serde_json::from_str(&cipher.decrypt(&blob).unwrap()).unwrap();
        assert_eq!(decrypted.port, "3306");
        assert_eq!(decrypted.database, "shop");
    }

    #[test]
    fn test_url_requires_database() {
        let cipher = ConnectionCipher::new(derive_key("k"));
        let mut connection = descriptor();
        connection.database.clear();
        assert!(generate_sql_api_url(&cipher, &connection, "SELECT 1", None, None).is_err());
    }

    #[test]
    fn test_url_without_query_or_id() {
        let cipher = ConnectionCipher::new(derive_key("k"));
        let url = generate_sql_api_url(&cipher, &descriptor(), "", None, None).unwrap();
        assert!(url.starts_with("/api/sql/query?"));
        assert!(!url.contains("&query="));
        assert!(!url.contains("apiId"));
        assert_eq!(generate_curl_command("/x"), "curl -X GET \"/x\"");
    }

    #[test]
    fn test_normalize_path_for_match() {
        assert_eq!(normalize_path_for_match("/api/sql/Users;"), "/api/sql/users");
        assert_eq!(normalize_path_for_match("api/sql/users/?query=x"), "/api/sql/users");
        assert_eq!(normalize_path_for_match("/api/sql/users;?connectionInfo=a"), "/api/sql/users");
        assert_eq!(normalize_path_for_match("/"), "/");
    }
}

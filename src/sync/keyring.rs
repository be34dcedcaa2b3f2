use std::collections::HashMap;

pub(crate) const SERVICE_NAME: &str = "listsync";

fn attributes<'a>(api_url: &'a str, subject: &'a str) -> HashMap<&'a str, &'a str> {
    let mut attrs = HashMap::new();
    attrs.insert("service", SERVICE_NAME);
    attrs.insert("server", api_url);
    attrs.insert("subject", subject);
    attrs
}

/// Store an API token for `subject` in the system keyring via Secret Service.
pub async fn store_token(api_url: &str, subject: &str, token: &str) -> Result<(), String> {
    let keyring = oo7::Keyring::new()
        .await
        .map_err(|e| format!("Failed to connect to keyring: {}", e))?;

    keyring
        .create_item(
            &format!("listsync token for {} ({})", subject, api_url),
            &attributes(api_url, subject),
            token.as_bytes(),
            true, // replace existing
        )
        .await
        .map_err(|e| format!("Failed to store token: {}", e))?;

    Ok(())
}

/// Load the API token for `subject`, if one was stored.
pub async fn load_token(api_url: &str, subject: &str) -> Result<Option<String>, String> {
    let keyring = oo7::Keyring::new()
        .await
        .map_err(|e| format!("Failed to connect to keyring: {}", e))?;

    let items = keyring
        .search_items(&attributes(api_url, subject))
        .await
        .map_err(|e| format!("Failed to search keyring: {}", e))?;

    let Some(item) = items.first() else {
        return Ok(None);
    };
    let secret = item
        .secret()
        .await
        .map_err(|e| format!("Failed to read secret: {}", e))?;
    let token = String::from_utf8(secret.to_vec())
        .map_err(|e| format!("Invalid UTF-8 in secret: {}", e))?;
    Ok(Some(token).filter(|t| !t.is_empty()))
}

/// Forget the API token for `subject`. Used on sign-out.
pub async fn delete_token(api_url: &str, subject: &str) -> Result<(), String> {
    let keyring = oo7::Keyring::new()
        .await
        .map_err(|e| format!("Failed to connect to keyring: {}", e))?;

    let items = keyring
        .search_items(&attributes(api_url, subject))
        .await
        .map_err(|e| format!("Failed to search keyring: {}", e))?;

    for item in items {
        item.delete()
            .await
            .map_err(|e| format!("Failed to delete token: {}", e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_keyed_per_server_and_subject() {
        let a = attributes("https://api.example.com/graphql", "alice");
        let b = attributes("https://api.example.com/graphql", "bob");
        assert_eq!(a["service"], SERVICE_NAME);
        assert_ne!(a, b);
    }
}

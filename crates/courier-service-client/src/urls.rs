use courier_service_types::{Result, ServiceError};

pub fn validated_base(base_url: &str) -> Result<String> {
    let base = base_url.trim().trim_end_matches('/');
    let host = base
        .strip_prefix("https://")
        .or_else(|| base.strip_prefix("http://"))
        .ok_or(ServiceError::InvalidBaseUrl)?;
    if host.is_empty() {
        return Err(ServiceError::InvalidBaseUrl);
    }
    Ok(base.to_string())
}

pub fn prekeys(base_url: &str, service_id: &str, device_id: u32) -> Result<String> {
    Ok(format!(
        "{}/v2/keys/{}/{}",
        validated_base(base_url)?,
        validated_service_id(service_id)?,
        device_id
    ))
}

pub fn messages(base_url: &str, service_id: &str) -> Result<String> {
    Ok(format!(
        "{}/v1/messages/{}",
        validated_base(base_url)?,
        validated_service_id(service_id)?
    ))
}

fn validated_service_id(service_id: &str) -> Result<&str> {
    let trimmed = service_id.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::InvalidInput("service_id"));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+'))
    {
        return Err(ServiceError::InvalidInput("service_id"));
    }
    Ok(trimmed)
}

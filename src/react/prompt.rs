//! 登录任务提示词
//!
//! system 轮：角色、安全规则（不复述凭证）、失败报告协议、可用工具列表；
//! user 轮：目标地址、认证方式、凭证与操作步骤。结束语随产物来源变化。

use crate::config::ArtifactSource;
use crate::core::LoginRequest;
use crate::tools::ToolCatalog;

/// 决策引擎以此前缀报告不可恢复的失败
pub const FAILURE_MARKER: &str = "TASK_FAILED:";

#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub mailbox_login_url: String,
    pub artifact_source: ArtifactSource,
    pub delimiter: String,
    pub required_keys: Vec<String>,
}

pub fn system_prompt(catalog: &ToolCatalog) -> String {
    format!(
        r#"You are a browser automation expert. You operate a real browser exclusively through the tools listed below.

SECURITY - DO NOT ECHO CREDENTIALS:
- Never repeat passwords, usernames, email addresses or verification codes in your text responses
- Refer to credentials by type only ("entered the password", "submitted the verification code")

WORKING RULES:
- Take a browser_snapshot before each interaction to see the page state
- Adapt to the actual page content; do not assume selectors
- If the same step fails twice in a row, stop and report the failure
- Do not keep retrying failed submissions; this can lock the account
- If the site reports bot detection or "Could not log you in now", report the failure immediately

ERROR REPORTING PROTOCOL:
If you hit an unrecoverable error, reply with exactly one line:
{marker} <brief description of what went wrong>

Available tools:
{tools}"#,
        marker = FAILURE_MARKER,
        tools = catalog.describe()
    )
}

pub fn login_task(request: &LoginRequest, settings: &PromptSettings) -> String {
    let creds = &request.credentials;
    let password_login = creds.has_password_login();
    let auth_type = if password_login {
        "username/password"
    } else {
        "magic link / email-only"
    };

    let mut credentials = format!(
        "Credentials:\n- Service email: {email}\n- Mailbox email: {email}\n- Mailbox password: {mailbox}\n",
        email = creds.email,
        mailbox = creds.mailbox_password
    );
    if let Some(username) = &creds.username {
        credentials.push_str(&format!("- Service username: {}\n", username));
    }
    if let Some(password) = &creds.password {
        credentials.push_str(&format!("- Service password: {}\n", password));
    }

    let username_step = if creds.username.is_some() {
        "Enter the username and submit"
    } else {
        "Enter the email if requested"
    };
    let password_step = if creds.password.is_some() {
        "Enter the password and submit"
    } else {
        "Look for a magic link or verification code sent to the email"
    };

    format!(
        r#"Log in to the service.

Login URL: {url}
Authentication type: {auth_type}

{credentials}
Steps:
1. Navigate to {url}
2. {username_step}
3. If asked for email or phone verification, enter the email
4. {password_step}
5. If a verification code or magic link is required:
   a. Open {mailbox_url} in a new tab or navigate to it
   b. Log in to the mailbox with the provided credentials
   c. Find the latest email from the service containing a code (6-8 digits) or a magic link
   d. Use the code or open the magic link
   e. Return to the service login page if needed and enter the code
6. Wait until you are logged in
7. {finish}"#,
        url = request.target_url,
        mailbox_url = settings.mailbox_login_url,
        finish = finish_instruction(settings),
    )
}

fn finish_instruction(settings: &PromptSettings) -> String {
    match settings.artifact_source {
        ArtifactSource::NetworkTrace => "Reply with \"Login complete\" when done".to_string(),
        ArtifactSource::Answer => {
            let mut s = format!(
                "When logged in, read the session cookies for the site and reply with only the cookie string, formatted as name=value pairs separated by \"{}\"",
                settings.delimiter
            );
            if !settings.required_keys.is_empty() {
                s.push_str(&format!(
                    ". It must include: {}",
                    settings.required_keys.join(", ")
                ));
            }
            s
        }
    }
}

/// 若回复遵循失败协议，返回描述
pub fn reported_failure(answer: &str) -> Option<&str> {
    answer
        .trim_start()
        .strip_prefix(FAILURE_MARKER)
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CredentialBundle;

    fn settings(source: ArtifactSource) -> PromptSettings {
        PromptSettings {
            mailbox_login_url: "https://mail.example.com/login".into(),
            artifact_source: source,
            delimiter: "; ".into(),
            required_keys: vec!["auth_token".into()],
        }
    }

    fn request(password: bool) -> LoginRequest {
        let credentials = CredentialBundle {
            email: "user@example.com".into(),
            mailbox_password: "mailpass".into(),
            username: password.then(|| "user".to_string()),
            password: password.then(|| "secret".to_string()),
        };
        LoginRequest::new("https://x.com/login", credentials, "http://cb.local/hook")
    }

    #[test]
    fn test_password_login_task() {
        let task = login_task(&request(true), &settings(ArtifactSource::Answer));
        assert!(task.contains("Authentication type: username/password"));
        assert!(task.contains("- Service password: secret"));
        assert!(task.contains("1. Navigate to https://x.com/login"));
        assert!(task.contains("https://mail.example.com/login"));
        assert!(task.contains("It must include: auth_token"));
    }

    #[test]
    fn test_magic_link_task_for_trace_source() {
        let task = login_task(&request(false), &settings(ArtifactSource::NetworkTrace));
        assert!(task.contains("magic link / email-only"));
        assert!(!task.contains("Service password"));
        assert!(task.contains("Login complete"));
    }

    #[test]
    fn test_reported_failure() {
        assert_eq!(
            reported_failure("  TASK_FAILED: bot detection"),
            Some("bot detection")
        );
        assert_eq!(reported_failure("auth_token=1"), None);
    }
}

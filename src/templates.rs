//! HTML templates with `{{placeholder}}` substitution.
//!
//! Callers escape untrusted values with [`escape`] before filling them in;
//! substitution is a single pass, so filled-in text is never re-expanded.

use crate::models::User;

const LAYOUT: &str = include_str!("../templates/layout.html");
pub const ERROR: &str = include_str!("../templates/error.html");
pub const OVERVIEW: &str = include_str!("../templates/overview.html");
pub const TOUR_CARD: &str = include_str!("../templates/tour_card.html");
pub const TOUR: &str = include_str!("../templates/tour.html");
pub const LOGIN: &str = include_str!("../templates/login.html");
pub const ACCOUNT: &str = include_str!("../templates/account.html");
pub const EMAIL_WELCOME: &str = include_str!("../templates/email/welcome.html");
pub const EMAIL_PASSWORD_RESET: &str = include_str!("../templates/email/password_reset.html");

/// Entity-encode text for element content and quoted attributes. Spaces
/// and slashes are encoded too.
pub fn escape(text: &str) -> String {
    ammonia::clean_text(text)
}

pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match values.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => output.push_str(value),
                    None => output.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                output.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    output.push_str(rest);
    output
}

/// Wrap page content in the site layout.
pub fn page(title: &str, user: Option<&User>, content: &str) -> String {
    let user_nav = match user {
        Some(user) => format!(
            r#"<a class="nav__el" href="/my-tours">My bookings</a><a class="nav__el" href="/me">{}</a>"#,
            escape(&user.name)
        ),
        None => r#"<a class="nav__el" href="/login">Log in</a>"#.to_string(),
    };
    fill(
        LAYOUT,
        &[
            ("title", escape(title).as_str()),
            ("user_nav", user_nav.as_str()),
            ("content", content),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_substitutes_known_keys_once() {
        let out = fill("<p>{{ a }} and {{b}}</p>", &[("a", "{{b}}"), ("b", "x")]);
        assert_eq!(out, "<p>{{b}} and x</p>");
    }

    #[test]
    fn unknown_keys_and_unterminated_braces_are_kept() {
        assert_eq!(fill("{{missing}} {{", &[]), "{{missing}} {{");
    }

    #[test]
    fn escape_neutralizes_markup() {
        let escaped = escape("<script>alert(1)</script>");
        assert!(!escaped.contains('<'));
    }
}

use html_escape::{encode_double_quoted_attribute, encode_text};

use super::identity::UserIdentity;
use crate::commands::search::snippet;
use crate::model::PageHit;

const STYLE: &str = "
body { font-family: system-ui, sans-serif; max-width: 56rem; margin: 2rem auto; padding: 0 1rem; color: #222; }
nav { display: flex; justify-content: space-between; align-items: center; }
form.stack { display: grid; gap: .5rem; max-width: 20rem; }
.flash { background: #fff4d6; border: 1px solid #e0c36c; padding: .5rem .75rem; margin: .5rem 0; }
.search { display: flex; gap: .5rem; margin: 1rem 0; }
.search input { flex: 1; }
article.page { border-top: 1px solid #ddd; padding: .75rem 0; }
article.page h3 { margin: 0 0 .25rem; font-size: 1rem; }
article.page .section { color: #666; font-weight: normal; }
pre { white-space: pre-wrap; }
.error { color: #a00; }
";

const SEARCH_SCRIPT: &str = "
const form = document.getElementById('search-form');
const results = document.getElementById('results');
async function runSearch(event) {
  if (event) { event.preventDefault(); }
  const params = new URLSearchParams(new FormData(form));
  const response = await fetch('/search?' + params.toString(), { credentials: 'same-origin' });
  if (response.redirected) { window.location = response.url; return; }
  results.innerHTML = await response.text();
}
form.addEventListener('submit', runSearch);
form.querySelector('select').addEventListener('change', runSearch);
runSearch();
";

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n<title>{}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        encode_text(title)
    )
}

fn flashes(messages: &[String]) -> String {
    messages
        .iter()
        .map(|message| format!("<div class=\"flash\">{}</div>", encode_text(message)))
        .collect::<Vec<String>>()
        .join("\n")
}

pub(crate) fn login_page(messages: &[String]) -> String {
    let body = format!(
        "<h1>Sign in</h1>
{}
<form class=\"stack\" method=\"post\" action=\"/login\">
  <label>Username <input name=\"username\" autocomplete=\"username\" required></label>
  <label>Password <input name=\"password\" type=\"password\" autocomplete=\"current-password\" required></label>
  <button type=\"submit\">Sign in</button>
</form>
<p>No account yet? <a href=\"/register\">Register</a></p>",
        flashes(messages)
    );
    layout("Sign in", &body)
}

pub(crate) fn register_page(messages: &[String]) -> String {
    let body = format!(
        "<h1>Create an account</h1>
{}
<form class=\"stack\" method=\"post\" action=\"/register\">
  <label>Username <input name=\"username\" autocomplete=\"username\" required></label>
  <label>Display name <input name=\"name\" autocomplete=\"name\"></label>
  <label>Password <input name=\"password\" type=\"password\" autocomplete=\"new-password\" required></label>
  <label>Confirm password <input name=\"confirm_password\" type=\"password\" autocomplete=\"new-password\" required></label>
  <button type=\"submit\">Register</button>
</form>
<p>Already registered? <a href=\"/login\">Sign in</a></p>",
        flashes(messages)
    );
    layout("Register", &body)
}

pub(crate) fn dashboard_page(user: &UserIdentity, sections: &[String], messages: &[String]) -> String {
    let options = sections
        .iter()
        .map(|section| {
            format!(
                "<option value=\"{}\">{}</option>",
                encode_double_quoted_attribute(section),
                encode_text(section)
            )
        })
        .collect::<Vec<String>>()
        .join("\n    ");

    let body = format!(
        "<nav><h1>Textbook search</h1><span>{} &middot; <a href=\"/logout\">Sign out</a></span></nav>
{}
<form id=\"search-form\" class=\"search\">
  <input name=\"query\" type=\"search\" placeholder=\"Search page text\">
  <select name=\"section\">
    <option value=\"\">All sections</option>
    {options}
  </select>
  <button type=\"submit\">Search</button>
</form>
<div id=\"results\"></div>
<script>{SEARCH_SCRIPT}</script>",
        encode_text(user.display_name()),
        flashes(messages)
    );
    layout("Dashboard", &body)
}

/// Partial page swapped into the dashboard by the search form.
pub(crate) fn search_results(hits: &[PageHit]) -> String {
    if hits.is_empty() {
        return "<p class=\"empty\">No pages found.</p>".to_string();
    }

    hits.iter()
        .map(|hit| {
            let text = hit.page_text.as_deref().unwrap_or_default();
            format!(
                "<article class=\"page\" data-id=\"{}\">
  <h3>Page {} <span class=\"section\">{}</span></h3>
  <p>{}</p>
  <details><summary>Full page text</summary><pre>{}</pre></details>
</article>",
                hit.id,
                hit.page_number,
                encode_text(hit.section_name.as_deref().unwrap_or_default()),
                encode_text(&snippet(Some(text))),
                encode_text(text)
            )
        })
        .collect::<Vec<String>>()
        .join("\n")
}

pub(crate) fn error_fragment(message: &str) -> String {
    format!("<p class=\"error\">{}</p>", encode_text(message))
}

pub(crate) fn error_page(message: &str) -> String {
    layout("Error", &error_fragment(message))
}

use axum::response::Html;
use tera::{Context, Tera};

use crate::error::AppError;

/// Initialize the Tera template engine from a glob such as `templates/**/*`
pub fn init_templates(glob: &str) -> Result<Tera, AppError> {
    let tera = Tera::new(glob)?;
    tracing::debug!(
        templates = ?tera.get_template_names().collect::<Vec<_>>(),
        "Loaded templates"
    );
    Ok(tera)
}

/// Render `name` with `context` into an HTML response body
pub fn render(tera: &Tera, name: &str, context: &Context) -> Result<Html<String>, AppError> {
    Ok(Html(tera.render(name, context)?))
}

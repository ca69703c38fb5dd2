// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;

use tera::{Context, Tera, Value};

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::services::shell::sh_escape;
use crate::app::types::{ContainerSpec, SubmitContext};

const TEMPLATE_NAME: &str = "hpc_submit";

/// Built-in submission script. Runs the command, then marks every file it is
/// responsible for with the terminator so readers on a lagging shared
/// filesystem can tell a finished file from a partial one.
pub const DEFAULT_SUBMIT_TEMPLATE: &str = r#"#!/bin/bash
{% for line in directives -%}
{{ line }}
{% endfor %}
# {{ job_name }}
cd {{ working_dir | sh }} || exit 1
echo "remote job id: {{ job_id_ref }}"
{% for var in env -%}
export {{ var.name | sh }}={{ var.value | sh }}
{% endfor -%}
{% if modules -%}
module load{% for module in modules %} {{ module | sh }}{% endfor %}
{% endif -%}
export OMP_NUM_THREADS={{ threads }}

{% if container_prefix %}{{ container_prefix }} {% endif %}/bin/bash -c {{ command | sh }}
rc=$?
{% if expected_outputs %}
for f in{% for path in expected_outputs %} {{ path | sh }}{% endfor %}; do
  [ -f "$f" ] && printf '\n%s\n' {{ terminator | sh }} >> "$f"
done
{% endif %}
printf '%s\n%s\n' "$rc" {{ terminator | sh }} > {{ result_path | sh }}
echo {{ terminator | sh }}
exit $rc
"#;

fn sh_filter(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Ok(Value::String(sh_escape(&raw)))
}

/// Renders the submission script. `template` overrides the built-in one.
pub fn render_submit_script(template: Option<&str>, ctx: &SubmitContext) -> AppResult<String> {
    let mut tera = Tera::default();
    tera.register_filter("sh", sh_filter);
    tera.add_raw_template(TEMPLATE_NAME, template.unwrap_or(DEFAULT_SUBMIT_TEMPLATE))
        .map_err(|err| template_error(format!("invalid submit template: {err}")))?;
    let context = Context::from_serialize(ctx)
        .map_err(|err| template_error(format!("invalid template context: {err}")))?;
    tera.render(TEMPLATE_NAME, &context)
        .map_err(|err| template_error(format!("submit template render failed: {err:?}")))
}

/// `apptainer exec --bind a,b <args> image` style prefix.
pub fn container_prefix(spec: &ContainerSpec) -> Option<String> {
    if spec.image.trim().is_empty() {
        return None;
    }
    let runtime = if spec.runtime.trim().is_empty() {
        "apptainer"
    } else {
        spec.runtime.trim()
    };
    let mut parts = vec![runtime.to_string(), "exec".to_string()];
    if !spec.binds.is_empty() {
        parts.push("--bind".to_string());
        parts.push(sh_escape(&spec.binds.join(",")));
    }
    parts.extend(spec.args.iter().cloned());
    parts.push(sh_escape(spec.image.trim()));
    Some(parts.join(" "))
}

fn template_error(message: String) -> AppError {
    AppError::with_message(AppErrorKind::InvalidArgument, codes::TEMPLATE_ERROR, message)
}

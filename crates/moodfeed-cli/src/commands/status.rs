use serde_json::json;

use crate::cli::StatusArgs;

use super::{CommandResult, Context};

pub fn run(args: &StatusArgs, context: &Context) -> CommandResult {
    if args.reset {
        context.clients.reset_all();
    }

    let fallback = context.clients.fallback.status();
    CommandResult::new(None).with_data(json!({
        "fallback": fallback,
        "providers": context.clients.statuses(),
    }))
}

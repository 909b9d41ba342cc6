use crate::Context;
use crate::ui;
use actionplan::{Catalog, Phase};
use colored::Colorize;

pub fn run(ctx: &Context) {
    ui::header("Action catalog");

    for phase in Phase::ALL {
        ui::section(&phase.to_string());
        for desc in Catalog::descriptors().iter().filter(|d| d.phase == phase) {
            let reversible = if desc.reversible {
                format!("{:<13}", "reversible").green()
            } else {
                format!("{:<13}", "irreversible").yellow()
            };
            println!(
                "  {:<28} {} {}",
                desc.action_type.as_str(),
                reversible,
                desc.summary
            );
            if ctx.verbose > 0 {
                ui::dim(&format!("    requires: {}", desc.required_params.join(", ")));
            }
        }
    }
}

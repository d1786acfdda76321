//! Instruction template sent alongside every visualization prompt.

use crate::sandbox::policy;

/// System message asking for plotting code the sandbox will accept.
pub fn visualization_role_text() -> String {
    let modules = policy::ALLOWED_IMPORT_ROOTS.join(", ");
    format!(
        "You write Python code that visualizes mathematical, statistical and machine-learning concepts for college students.\n\
         Use only these modules: {modules}. Import numpy as np and matplotlib.pyplot as plt.\n\
         Create exactly one figure with plt.figure() or plt.subplots(); subplots inside that figure are fine.\n\
         Give the figure a title, label the axes, and add a legend when there is more than one series.\n\
         Do not call plt.show(), plt.savefig() or plt.close(), and leave rcParams, styles and usetex alone.\n\
         Do not read or write files, access the network, start processes, or use input().\n\
         Return a single ```python fenced code block and nothing else."
    )
}

/// User message wrapping the free-text prompt.
pub fn visualization_user_text(prompt: &str) -> String {
    format!("Create a visualization of: {}", prompt.trim())
}

//! Capability allow-lists shared by the static validator and the interpreter bootstrap.

/// Top-level modules generated code may import.
pub const ALLOWED_IMPORT_ROOTS: &[&str] = &[
    "numpy",
    "math",
    "cmath",
    "statistics",
    "random",
    "matplotlib",
    "mpl_toolkits",
];

/// Roots whose submodules are allow-listed individually. `mpl_toolkits` must name one.
pub const ALLOWED_SUBMODULES: &[(&str, &[&str])] = &[
    (
        "matplotlib",
        &[
            "pyplot",
            "patches",
            "colors",
            "cm",
            "ticker",
            "lines",
            "collections",
            "gridspec",
            "markers",
            "path",
            "patheffects",
            "transforms",
        ],
    ),
    ("numpy", &["random", "linalg", "fft", "polynomial", "ma"]),
    ("mpl_toolkits", &["mplot3d"]),
];

/// Modules whose whole namespace may be star-imported.
pub const STAR_IMPORT_MODULES: &[&str] = &["math", "cmath", "statistics"];

/// Builtins that reach files, the interpreter, or object internals.
pub const DENIED_BUILTINS: &[&str] = &[
    "open",
    "exec",
    "eval",
    "compile",
    "__import__",
    "getattr",
    "setattr",
    "delattr",
    "globals",
    "locals",
    "vars",
    "dir",
    "input",
    "breakpoint",
    "help",
    "memoryview",
    "exit",
    "quit",
];

/// Attribute or imported names that lead to I/O, processes, native code or global state.
pub const DENIED_ATTRIBUTES: &[&str] = &[
    // escape hatches re-exported by allowed packages
    "os",
    "sys",
    "subprocess",
    "shutil",
    "socket",
    "pathlib",
    "importlib",
    "builtins",
    "ctypes",
    "ctypeslib",
    "pickle",
    "marshal",
    "io",
    "tempfile",
    "urllib",
    "http",
    "f2py",
    "distutils",
    "testing",
    "cbook",
    "npyio",
    "lib",
    // matplotlib modules that write files or spawn helpers
    "backends",
    "backend_bases",
    "backend_pdf",
    "backend_pgf",
    "backend_ps",
    "backend_svg",
    "image",
    "animation",
    "style",
    "texmanager",
    "dviread",
    // file readers and writers
    "savefig",
    "imsave",
    "imread",
    "save",
    "savez",
    "savez_compressed",
    "savetxt",
    "load",
    "loadtxt",
    "genfromtxt",
    "fromfile",
    "tofile",
    "memmap",
    "open_memmap",
    "DataSource",
    "dump",
    "get_sample_data",
    // global configuration (`text.usetex`, `animation.ffmpeg_path`, ...)
    "rc",
    "rc_params",
    "rcdefaults",
    "rc_file",
    "rc_file_defaults",
    "use",
    "switch_backend",
    "matplotlib_fname",
    "get_cachedir",
    "get_configdir",
    // frame and code objects
    "gi_frame",
    "gi_code",
    "cr_frame",
    "ag_frame",
    "tb_frame",
    "tb_next",
    "f_back",
    "f_globals",
    "f_locals",
    "f_builtins",
    "f_code",
];

/// Names refused wherever they appear, including bare names and keyword arguments.
pub const DENIED_NAMES: &[&str] = &[
    "rcParams",
    "rcParamsDefault",
    "rcParamsOrig",
    "rc_context",
    "rc_params_from_file",
    "usetex",
    "fromregex",
    "thumbnail",
    "PdfFile",
    "PdfPages",
    "FFMpegWriter",
    "FFMpegFileWriter",
    "ImageMagickWriter",
    "ImageMagickFileWriter",
];

/// Attribute prefixes denied wholesale (`canvas.print_png` and friends write files).
pub const DENIED_ATTRIBUTE_PREFIXES: &[&str] = &["print_"];

/// Dunder names that are ordinary in plotting scripts.
pub const ALLOWED_DUNDERS: &[&str] = &[
    "__name__",
    "__main__",
    "__init__",
    "__repr__",
    "__str__",
    "__len__",
    "__iter__",
    "__next__",
    "__call__",
    "__eq__",
    "__lt__",
    "__add__",
    "__mul__",
];

/// Builtins exposed inside the interpreter scope.
pub const RUNTIME_BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "callable", "chr", "complex", "dict", "divmod", "enumerate",
    "filter", "float", "format", "frozenset", "hasattr", "hash", "id", "int", "isinstance",
    "issubclass", "iter", "len", "list", "map", "max", "min", "next", "object", "ord", "pow",
    "print", "property", "range", "repr", "reversed", "round", "set", "slice", "sorted",
    "staticmethod", "classmethod", "str", "sum", "super", "tuple", "type", "zip",
    "ArithmeticError", "AssertionError", "AttributeError", "Exception", "IndexError",
    "KeyError", "LookupError", "NameError", "NotImplementedError", "OverflowError",
    "RuntimeError", "StopIteration", "TypeError", "ValueError", "ZeroDivisionError",
    "True", "False", "None", "NotImplemented", "Ellipsis",
];

fn allowed_submodules(root: &str) -> Option<&'static [&'static str]> {
    ALLOWED_SUBMODULES
        .iter()
        .find(|(r, _)| *r == root)
        .map(|(_, subs)| *subs)
}

/// Whether `module` (dotted path) may be imported by generated code.
pub fn is_import_allowed(module: &str) -> bool {
    let mut parts = module.split('.');
    let Some(root) = parts.next() else {
        return false;
    };
    if !ALLOWED_IMPORT_ROOTS.contains(&root) {
        return false;
    }
    let rest: Vec<&str> = parts.collect();
    if rest.iter().any(|p| is_attribute_denied(p)) {
        return false;
    }
    match (allowed_submodules(root), rest.first()) {
        (Some(subs), Some(sub)) => subs.contains(sub),
        (Some(_), None) => root != "mpl_toolkits",
        (None, _) => true,
    }
}

/// Whether `from module import *` is acceptable.
pub fn is_star_import_allowed(module: &str) -> bool {
    STAR_IMPORT_MODULES.contains(&module)
}

/// Denied in attribute position (`x.name`) and as an imported name.
pub fn is_attribute_denied(name: &str) -> bool {
    DENIED_ATTRIBUTES.contains(&name)
        || DENIED_NAMES.contains(&name)
        || DENIED_ATTRIBUTE_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Denied in any position, bare names and keyword arguments included.
pub fn is_name_denied(name: &str) -> bool {
    DENIED_NAMES.contains(&name)
}

pub fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plotting_imports_pass() {
        for m in [
            "numpy",
            "numpy.random",
            "numpy.linalg",
            "math",
            "matplotlib",
            "matplotlib.pyplot",
            "matplotlib.patches",
            "matplotlib.colors",
            "mpl_toolkits.mplot3d",
            "mpl_toolkits.mplot3d.art3d",
        ] {
            assert!(is_import_allowed(m), "{m}");
        }
    }

    #[test]
    fn escape_imports_fail() {
        for m in [
            "os",
            "socket",
            "requests",
            "numpy.ctypeslib",
            "numpy.f2py",
            "numpy.lib.npyio",
            "matplotlib.cbook",
            "matplotlib.backends.backend_pdf",
            "matplotlib.image",
            "matplotlib.animation",
            "matplotlib.style",
            "matplotlib.texmanager",
            "mpl_toolkits",
            "mpl_toolkits.axes_grid1",
            "",
        ] {
            assert!(!is_import_allowed(m), "{m}");
        }
    }

    #[test]
    fn star_imports_only_from_pure_math() {
        assert!(is_star_import_allowed("math"));
        assert!(!is_star_import_allowed("numpy"));
        assert!(!is_star_import_allowed("matplotlib.pyplot"));
    }

    #[test]
    fn print_prefix_is_denied() {
        assert!(is_attribute_denied("print_png"));
        assert!(is_attribute_denied("savefig"));
        assert!(!is_attribute_denied("plot"));
        assert!(!is_attribute_denied("print"));
    }

    #[test]
    fn configuration_names_are_denied_anywhere() {
        for n in ["rcParams", "usetex", "rc_context", "PdfPages", "fromregex"] {
            assert!(is_name_denied(n), "{n}");
        }
        assert!(!is_name_denied("image"));
        assert!(is_attribute_denied("image"));
        assert!(!is_name_denied("x"));
    }

    #[test]
    fn dunder_detection() {
        assert!(is_dunder("__class__"));
        assert!(!is_dunder("____"));
        assert!(!is_dunder("_private"));
    }
}

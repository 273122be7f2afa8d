use hakoniwa::Rlimit;

use crate::executor::ExecutionLimits;
use crate::types::Language;

// Writable mappings node needs beyond the guest's own data: thread stacks,
// allocator arenas and V8's code and heap bookkeeping.
const NODE_DATA_HEADROOM: u64 = 256 * 1024 * 1024;

// Appended after the guest program. Calls `solution` with the stdin input read
// as a JSON argument list, falling back to whitespace separated tokens.
const JAVASCRIPT_HARNESS: &str = r#"
;(() => {
  if (typeof solution !== 'function') return;
  const raw = require('fs').readFileSync(0, 'utf8').trim();
  let args;
  try {
    args = raw === '' ? [] : JSON.parse('[' + raw + ']');
  } catch (_) {
    args = raw.split(/\s+/).map((token) => {
      try { return JSON.parse(token); } catch (_) { return token; }
    });
  }
  const result = solution(...args);
  if (result !== undefined) console.log(String(result));
})();
"#;

const PYTHON_HARNESS: &str = r#"

def __gradebox_main():
    import json, sys
    fn = globals().get("solution")
    if not callable(fn):
        return
    raw = sys.stdin.read().strip()
    try:
        args = json.loads("[" + raw + "]") if raw else []
    except ValueError:
        args = []
        for token in raw.split():
            try:
                args.append(json.loads(token))
            except ValueError:
                args.append(token)
    result = fn(*args)
    if result is not None:
        print(result)

__gradebox_main()
"#;

/// How one language is launched inside the sandbox.
#[derive(Clone, Debug)]
pub struct LanguageProfile {
    pub language: Language,
    pub program: String,
}

impl LanguageProfile {
    pub fn new(language: Language, program: String) -> Self {
        Self { language, program }
    }

    pub fn source_file(&self) -> &'static str {
        match self.language {
            Language::JavaScript => "main.js",
            Language::Python => "main.py",
        }
    }

    pub fn render(&self, code: &str) -> String {
        let harness = match self.language {
            Language::JavaScript => JAVASCRIPT_HARNESS,
            Language::Python => PYTHON_HARNESS,
        };
        format!("{}\n{}", code, harness)
    }

    /// Arguments for `program`, relative to the sandbox working directory.
    pub fn args(&self, limits: &ExecutionLimits) -> Vec<String> {
        match self.language {
            Language::JavaScript => vec![
                format!("--max-old-space-size={}", (limits.memory_limit_kb / 1024).max(16)),
                "--disallow-code-generation-from-strings".to_string(),
                self.source_file().to_string(),
            ],
            Language::Python => vec![
                "-I".to_string(),
                "-B".to_string(),
                self.source_file().to_string(),
            ],
        }
    }

    /// Hard memory rlimit for the guest. V8 reserves far more address space
    /// than it touches, so node gets RLIMIT_DATA, which only counts writable
    /// private mappings and so also bounds `Buffer` and `ArrayBuffer` storage.
    pub fn memory_rlimit(&self, limits: &ExecutionLimits) -> (Rlimit, u64) {
        let bytes = limits.memory_limit_kb * 1024;
        match self.language {
            Language::JavaScript => (Rlimit::Data, bytes + NODE_DATA_HEADROOM),
            Language::Python => (Rlimit::As, bytes),
        }
    }
}

//! Path canonicalization.

/// Lexically canonicalize a path, removing redundant components.
/// Does not access the disk, but only simplifies things like
/// "foo/./bar" => "foo/bar".
/// Depfiles in particular name headers as "src/../include/x.h", and the same
/// file must map to the same graph node however it is spelled.
pub fn canon_path_in_place(path: &mut String) {
    if path.is_empty() {
        return;
    }
    let absolute = path.starts_with('/');
    let trailing_slash = path.ends_with('/') || path.ends_with("/.");

    // Components kept so far.  ".." only survives at the front of a relative
    // path, where there is nothing left to pop.
    let mut components: Vec<&str> = Vec::new();
    let mut leading_parents = 0;
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if components.len() > leading_parents {
                    components.pop();
                } else if !absolute {
                    components.push("..");
                    leading_parents += 1;
                }
            }
            c => components.push(c),
        }
    }

    let mut out = String::with_capacity(path.len());
    if absolute {
        out.push('/');
    }
    out.push_str(&components.join("/"));
    if trailing_slash && !components.is_empty() {
        out.push('/');
    }
    *path = out;
}

pub fn canon_path<T: Into<String>>(inpath: T) -> String {
    let mut path: String = inpath.into();
    canon_path_in_place(&mut path);
    path
}

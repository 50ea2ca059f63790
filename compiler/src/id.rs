// id.rs — Stable arena identifiers for model objects and generated IR
//
// Every model object, generated class, field, method, local, statement and
// label is addressed by a dense index into its owning arena. Indices are
// allocated in creation order, so two runs over the same model produce the
// same IDs and therefore byte-identical dumps.

/// Stable identifier for a model object (component, port, relation, attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjId(pub u32);

/// Stable identifier for a generated class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// Stable identifier for a generated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

/// Stable identifier for a generated method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

/// Method-local variable. Scoped to one method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

/// Statement identity inside one method body. Survives insertions and
/// removals of other statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId(pub u32);

/// Branch target inside one method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

macro_rules! index_impl {
    ($($ty:ident),*) => {
        $(
            impl $ty {
                pub fn index(self) -> usize {
                    self.0 as usize
                }
            }
        )*
    };
}

index_impl!(ObjId, ClassId, FieldId, MethodId, LocalId, StmtId, Label);

/// Per-body allocator for statement IDs and labels. Produces monotonically
/// increasing IDs, never reusing one after removal.
#[derive(Debug, Default, Clone)]
pub struct IdAllocator {
    next_stmt: u32,
    next_label: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_stmt(&mut self) -> StmtId {
        let id = StmtId(self.next_stmt);
        self.next_stmt += 1;
        id
    }

    pub fn alloc_label(&mut self) -> Label {
        let id = Label(self.next_label);
        self.next_label += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_monotonic() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.alloc_stmt(), StmtId(0));
        assert_eq!(alloc.alloc_stmt(), StmtId(1));
        assert_eq!(alloc.alloc_label(), Label(0));
        assert_eq!(alloc.alloc_stmt(), StmtId(2));
    }
}

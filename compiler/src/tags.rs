// tags.rs — Value and type tags on generated fields
//
// Immutable metadata attached to generated fields:
//
// * `ObjectTag`: the model object a reference field always holds.
// * `ValueTag`: the single constant value of an immutable value-holder.
// * `TypeTag`: the authoritative static token type of a value-holder.
//
// A tag, once attached, is never replaced by a different one; attaching a
// conflicting tag is an inconsistency.

use std::collections::HashMap;

use crate::error::{Result, SpecError};
use crate::id::{FieldId, ObjId};
use crate::token::Token;
use crate::types::TokenType;

#[derive(Debug, Default, Clone)]
pub struct TagStore {
    objects: HashMap<FieldId, ObjId>,
    values: HashMap<FieldId, Token>,
    types: HashMap<FieldId, TokenType>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag_object(&mut self, field: FieldId, obj: ObjId) -> Result<()> {
        if let Some(prev) = self.objects.get(&field) {
            if *prev != obj {
                return Err(SpecError::inconsistency(
                    "tag store",
                    format!("field {} already refers to object {}", field.0, prev.0),
                ));
            }
        }
        self.objects.insert(field, obj);
        Ok(())
    }

    pub fn tag_value(&mut self, field: FieldId, value: Token) -> Result<()> {
        if let Some(prev) = self.values.get(&field) {
            if *prev != value {
                return Err(SpecError::inconsistency(
                    "tag store",
                    format!("field {} already holds constant {}", field.0, prev),
                ));
            }
        }
        self.values.insert(field, value);
        Ok(())
    }

    pub fn tag_type(&mut self, field: FieldId, ty: TokenType) -> Result<()> {
        if let Some(prev) = self.types.get(&field) {
            if *prev != ty {
                return Err(SpecError::inconsistency(
                    "tag store",
                    format!("field {} already has type {}", field.0, prev),
                ));
            }
        }
        self.types.insert(field, ty);
        Ok(())
    }

    pub fn object(&self, field: FieldId) -> Option<ObjId> {
        self.objects.get(&field).copied()
    }

    pub fn value(&self, field: FieldId) -> Option<&Token> {
        self.values.get(&field)
    }

    pub fn token_type(&self, field: FieldId) -> Option<&TokenType> {
        self.types.get(&field)
    }

    /// Fields carrying a constant value.
    pub fn valued_fields(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.values.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retagging_with_same_value_is_allowed() {
        let mut tags = TagStore::new();
        tags.tag_value(FieldId(0), Token::Int(5)).unwrap();
        tags.tag_value(FieldId(0), Token::Int(5)).unwrap();
        assert!(tags.tag_value(FieldId(0), Token::Int(6)).is_err());
        assert_eq!(tags.value(FieldId(0)), Some(&Token::Int(5)));
    }

    #[test]
    fn object_tags_do_not_change() {
        let mut tags = TagStore::new();
        tags.tag_object(FieldId(1), ObjId(3)).unwrap();
        assert!(tags.tag_object(FieldId(1), ObjId(4)).is_err());
        assert_eq!(tags.object(FieldId(1)), Some(ObjId(3)));
    }

    #[test]
    fn rejected_type_tag_keeps_the_original() {
        let mut tags = TagStore::new();
        tags.tag_type(FieldId(2), TokenType::Int).unwrap();
        tags.tag_type(FieldId(2), TokenType::Int).unwrap();
        assert!(tags.tag_type(FieldId(2), TokenType::Double).is_err());
        assert_eq!(tags.token_type(FieldId(2)), Some(&TokenType::Int));
    }
}

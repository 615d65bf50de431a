/**
 * COLLECTION GÉNÉRIQUE - Magasin borné en mémoire rendu en json:api
 *
 * RÔLE :
 * Ce module définit le conteneur commun aux collections `devices` et
 * `diagnostics` : une map id -> item doublée d'une file d'âge pour
 * l'éviction, plus la sérialisation json:api avec filtres d'attributs.
 *
 * FONCTIONNEMENT :
 * - Capacité bornée, éviction stricte du plus ancien inséré
 * - Ajout d'un id existant : remplacement sur place, ordre d'âge inchangé
 * - `?fields[<type>]=a,b,c` filtre les attributs par type d'item ;
 *   une clé `a.b` admet en plus le marqueur `a.` (sous-objet partiel,
 *   un seul niveau)
 * - Timestamps `created` (RFC 3339) toujours rendus, `updated` seulement
 *   s'il diffère
 */

use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// Enveloppe commune des items de collection
#[derive(Debug, Clone)]
pub struct ItemMeta {
    pub uuid: Uuid,
    pub created: OffsetDateTime,
    pub updated: OffsetDateTime,
}

impl ItemMeta {
    pub fn new() -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            uuid: Uuid::new_v4(),
            created: now,
            updated: now,
        }
    }

    /// Marque l'item comme modifié
    pub fn touch(&mut self) {
        self.updated = OffsetDateTime::now_utc();
    }
}

impl Default for ItemMeta {
    fn default() -> Self {
        Self::new()
    }
}

pub type KeySet = HashSet<String>;

/// Filtre `fields` de la query string : type d'item -> liste brute de clés
pub type FieldsFilter = HashMap<String, String>;

pub trait CollectionItem {
    fn item_id(&self) -> String;
    fn type_name(&self) -> &'static str;
    /// Attributs de l'item, restreints à `keys` quand il est non vide
    fn attributes(&self, keys: &KeySet) -> Value;
    fn meta(&self) -> &ItemMeta;
}

/// Découpe la valeur d'un `fields[<type>]` en jeu de clés.
/// Une clé `a.b` ajoute aussi le marqueur `a.` qui signale qu'un
/// sous-objet partiel est voulu (un seul niveau de sous-clés).
pub fn parse_field_keys(raw: &str) -> KeySet {
    let mut keys = KeySet::new();

    for token in raw.split([',', ' ']) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        keys.insert(token.to_string());

        if let Some(pos) = token.find('.') {
            let sub = &token[..pos + 1];
            // un seul niveau de sous-clés est admis
            if !token[pos + 1..].contains('.') {
                keys.insert(sub.to_string());
            }
        }
    }

    keys
}

/// Vrai quand l'attribut `name` doit être rendu pour ce jeu de clés
pub fn key_wanted(keys: &KeySet, name: &str) -> bool {
    keys.is_empty() || keys.contains(name) || keys.contains(&format!("{}.", name))
}

/// Applique le filtre de clés à un objet d'attributs, y compris les
/// sous-objets partiels signalés par un marqueur `a.`
pub fn filter_attributes(attrs: Value, keys: &KeySet) -> Value {
    if keys.is_empty() {
        return attrs;
    }
    let Value::Object(map) = attrs else {
        return attrs;
    };

    let mut out = Map::new();
    for (name, value) in map {
        if keys.contains(&name) {
            out.insert(name, value);
            continue;
        }
        if keys.contains(&format!("{}.", name)) {
            // sous-objet partiel : ne garder que les sous-clés listées
            if let Value::Object(sub) = value {
                let mut filtered = Map::new();
                for (sub_name, sub_value) in sub {
                    if keys.contains(&format!("{}.{}", name, sub_name)) {
                        filtered.insert(sub_name, sub_value);
                    }
                }
                out.insert(name, Value::Object(filtered));
            } else {
                out.insert(name, value);
            }
        }
    }
    Value::Object(out)
}

/// Objet meta.collection commun aux collections et à la file d'actions
pub fn json_meta_collection(offset: usize, limit: usize, total: usize) -> Value {
    let mut coll = Map::new();
    coll.insert("offset".into(), json!(offset));
    if limit > 0 {
        coll.insert("limit".into(), json!(limit));
    }
    coll.insert("total".into(), json!(total));
    json!({ "collection": Value::Object(coll) })
}

pub struct Collection<T> {
    name: &'static str,
    capacity: usize,
    items: HashMap<String, T>,
    /// ids triés par âge d'insertion, premier entré premier évincé
    age_sorted_ids: VecDeque<String>,
    holds_types: HashMap<&'static str, u16>,
}

impl<T: CollectionItem> Collection<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            items: HashMap::new(),
            age_sorted_ids: VecDeque::new(),
            holds_types: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.items.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    /// Ajoute un item. A capacité atteinte le plus ancien est évincé.
    /// Un id déjà présent est remplacé sur place sans changer l'ordre d'âge.
    pub fn add(&mut self, item: T) {
        let id = item.item_id();

        if self.items.contains_key(&id) {
            self.items.insert(id, item);
            return;
        }

        while self.items.len() >= self.capacity {
            self.evict_oldest();
        }

        *self.holds_types.entry(item.type_name()).or_insert(0) += 1;
        self.age_sorted_ids.push_back(id.clone());
        self.items.insert(id, item);
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self.age_sorted_ids.pop_front() {
            if let Some(item) = self.items.remove(&oldest) {
                let type_name = item.type_name();
                if let Some(count) = self.holds_types.get_mut(type_name) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.holds_types.remove(type_name);
                    }
                }
            }
            eprintln!("[{}] evicted item {}", self.name, oldest);
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.age_sorted_ids.clear();
        self.holds_types.clear();
    }

    fn key_set_for(&self, item: &T, fields: &FieldsFilter) -> Option<KeySet> {
        if fields.is_empty() {
            return Some(KeySet::new());
        }
        fields
            .get(item.type_name())
            .map(|raw| parse_field_keys(raw))
    }

    /// Attributs + timestamps, les timestamps ne sont jamais filtrés
    fn render_attributes(item: &T, keys: &KeySet) -> Value {
        let mut attrs = match item.attributes(keys) {
            Value::Object(map) => map,
            other => return other,
        };

        let meta = item.meta();
        if let Ok(ts) = meta.created.format(&Rfc3339) {
            attrs.insert("created".into(), json!(ts));
        }
        if meta.updated != meta.created {
            if let Ok(ts) = meta.updated.format(&Rfc3339) {
                attrs.insert("updated".into(), json!(ts));
            }
        }
        Value::Object(attrs)
    }

    fn json_api_item(item: &T, keys: &KeySet) -> Value {
        json!({
            "type": item.type_name(),
            "id": item.item_id(),
            "attributes": Self::render_attributes(item, keys),
        })
    }

    /// Collection complète au format json:api avec enveloppe meta
    pub fn to_json_api(&self, fields: &FieldsFilter) -> Value {
        let mut data = Vec::new();
        for item in self.items.values() {
            let Some(keys) = self.key_set_for(item, fields) else {
                // type non demandé par le filtre
                continue;
            };
            data.push(Self::json_api_item(item, &keys));
        }

        json!({
            "data": data,
            "meta": json_meta_collection(0, self.capacity, self.items.len()),
        })
    }

    /// Un seul item au format json:api, None si absent ou filtré
    pub fn to_json_api_item(&self, id: &str, fields: &FieldsFilter) -> Option<Value> {
        let item = self.items.get(id)?;
        let keys = self.key_set_for(item, fields)?;
        Some(json!({ "data": Self::json_api_item(item, &keys) }))
    }

    /// Même contenu sans l'enveloppe json:api
    pub fn to_plain_json(&self, fields: &FieldsFilter) -> Value {
        let mut out = Map::new();
        for item in self.items.values() {
            let Some(keys) = self.key_set_for(item, fields) else {
                continue;
            };
            out.insert(item.item_id(), Self::render_attributes(item, &keys));
        }
        Value::Object(out)
    }

    pub fn to_plain_json_item(&self, id: &str, fields: &FieldsFilter) -> Option<Value> {
        let item = self.items.get(id)?;
        let keys = self.key_set_for(item, fields)?;
        Some(Self::render_attributes(item, &keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeItem {
        meta: ItemMeta,
        id: String,
        value: u32,
    }

    impl FakeItem {
        fn new(id: &str, value: u32) -> Self {
            Self {
                meta: ItemMeta::new(),
                id: id.to_string(),
                value,
            }
        }
    }

    impl CollectionItem for FakeItem {
        fn item_id(&self) -> String {
            self.id.clone()
        }

        fn type_name(&self) -> &'static str {
            "fake"
        }

        fn attributes(&self, keys: &KeySet) -> Value {
            filter_attributes(
                json!({ "value": self.value, "detail": { "a": 1, "b": 2 } }),
                keys,
            )
        }

        fn meta(&self) -> &ItemMeta {
            &self.meta
        }
    }

    #[test]
    fn test_fifo_eviction() {
        let mut coll: Collection<FakeItem> = Collection::new("fakes", 3);
        coll.add(FakeItem::new("a", 1));
        coll.add(FakeItem::new("b", 2));
        coll.add(FakeItem::new("c", 3));
        coll.add(FakeItem::new("d", 4));

        assert_eq!(coll.len(), 3);
        assert!(!coll.contains("a"));
        assert!(coll.contains("b"));
        assert!(coll.contains("d"));
    }

    #[test]
    fn test_replace_in_place_keeps_age_order() {
        let mut coll: Collection<FakeItem> = Collection::new("fakes", 2);
        coll.add(FakeItem::new("a", 1));
        coll.add(FakeItem::new("b", 2));

        // remplacement de "a" : il reste le plus ancien
        coll.add(FakeItem::new("a", 10));
        assert_eq!(coll.get("a").unwrap().value, 10);

        coll.add(FakeItem::new("c", 3));
        assert!(!coll.contains("a"));
        assert!(coll.contains("b"));
        assert!(coll.contains("c"));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut coll: Collection<FakeItem> = Collection::new("fakes", 2);
        coll.add(FakeItem::new("a", 1));
        coll.clear();
        assert!(coll.is_empty());
        coll.clear();
        assert!(coll.is_empty());
    }

    #[test]
    fn test_parse_field_keys_with_subkeys() {
        let keys = parse_field_keys("value,detail.a");
        assert!(keys.contains("value"));
        assert!(keys.contains("detail.a"));
        assert!(keys.contains("detail."));
        assert!(!keys.contains("detail"));
    }

    #[test]
    fn test_field_filter_applies() {
        let coll = {
            let mut c: Collection<FakeItem> = Collection::new("fakes", 4);
            c.add(FakeItem::new("a", 7));
            c
        };

        let mut fields = FieldsFilter::new();
        fields.insert("fake".into(), "value".into());
        let rendered = coll.to_json_api_item("a", &fields).unwrap();
        let attrs = &rendered["data"]["attributes"];
        assert_eq!(attrs["value"], 7);
        assert!(attrs.get("detail").is_none());
        // created n'est jamais filtré
        assert!(attrs.get("created").is_some());

        // sous-objet partiel
        let mut fields = FieldsFilter::new();
        fields.insert("fake".into(), "detail.a".into());
        let rendered = coll.to_json_api_item("a", &fields).unwrap();
        let attrs = &rendered["data"]["attributes"];
        assert_eq!(attrs["detail"]["a"], 1);
        assert!(attrs["detail"].get("b").is_none());

        // type non demandé -> item filtré
        let mut fields = FieldsFilter::new();
        fields.insert("other".into(), "value".into());
        assert!(coll.to_json_api_item("a", &fields).is_none());
    }

    #[test]
    fn test_meta_collection_shape() {
        let coll = {
            let mut c: Collection<FakeItem> = Collection::new("fakes", 4);
            c.add(FakeItem::new("a", 1));
            c.add(FakeItem::new("b", 2));
            c
        };
        let v = coll.to_json_api(&FieldsFilter::new());
        assert_eq!(v["meta"]["collection"]["total"], 2);
        assert_eq!(v["meta"]["collection"]["limit"], 4);
        assert_eq!(v["meta"]["collection"]["offset"], 0);
        assert_eq!(v["data"].as_array().unwrap().len(), 2);
    }
}

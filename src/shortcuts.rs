//! Typed view of a decoded shortcut list. Unmodelled fields keep their slot
//! so an untouched file encodes back to the same bytes.

use crate::vdf::{self, Entry, FormatError, Value};

pub const SHORTCUTS_KEY: &str = "shortcuts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownField {
    AppName,
    Exe,
    StartDir,
}

impl KnownField {
    const ALL: [KnownField; 3] = [Self::AppName, Self::Exe, Self::StartDir];

    // Older Steam builds wrote lower-case keys ("appname", "exe").
    fn from_key(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "appname" => Some(Self::AppName),
            "exe" => Some(Self::Exe),
            "startdir" => Some(Self::StartDir),
            _ => None,
        }
    }

    fn default_key(self) -> &'static str {
        match self {
            Self::AppName => "AppName",
            Self::Exe => "Exe",
            Self::StartDir => "StartDir",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldSlot {
    Known { field: KnownField, key: String },
    Opaque(Entry),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutRecord {
    /// Position among the records of the list.
    pub index: usize,
    pub app_name: String,
    pub exe: String,
    pub start_dir: String,
    key: String,
    slots: Vec<FieldSlot>,
}

impl ShortcutRecord {
    fn from_entry(index: usize, key: String, children: Vec<Entry>) -> Self {
        let mut record = Self {
            index,
            app_name: String::new(),
            exe: String::new(),
            start_dir: String::new(),
            key,
            slots: Vec::with_capacity(children.len()),
        };

        for entry in children {
            let known = KnownField::from_key(&entry.key)
                .filter(|field| !record.has_slot(*field))
                .filter(|_| matches!(entry.value, Value::String(_)));
            match (known, entry.value) {
                (Some(field), Value::String(text)) => {
                    *record.field_mut(field) = text;
                    record.slots.push(FieldSlot::Known {
                        field,
                        key: entry.key,
                    });
                }
                (_, value) => record.slots.push(FieldSlot::Opaque(Entry {
                    key: entry.key,
                    value,
                })),
            }
        }
        record
    }

    /// The key this record is stored under, normally its stringified index.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fields this crate does not model, in file order.
    pub fn opaque_fields(&self) -> impl Iterator<Item = &Entry> {
        self.slots.iter().filter_map(|slot| match slot {
            FieldSlot::Opaque(entry) => Some(entry),
            FieldSlot::Known { .. } => None,
        })
    }

    pub fn field(&self, field: KnownField) -> &str {
        match field {
            KnownField::AppName => &self.app_name,
            KnownField::Exe => &self.exe,
            KnownField::StartDir => &self.start_dir,
        }
    }

    fn field_mut(&mut self, field: KnownField) -> &mut String {
        match field {
            KnownField::AppName => &mut self.app_name,
            KnownField::Exe => &mut self.exe,
            KnownField::StartDir => &mut self.start_dir,
        }
    }

    fn has_slot(&self, field: KnownField) -> bool {
        self.slots
            .iter()
            .any(|slot| matches!(slot, FieldSlot::Known { field: f, .. } if *f == field))
    }

    fn to_entry(&self) -> Entry {
        let mut children: Vec<Entry> = self
            .slots
            .iter()
            .map(|slot| match slot {
                FieldSlot::Known { field, key } => {
                    Entry::string(key.clone(), self.field(*field).to_string())
                }
                FieldSlot::Opaque(entry) => entry.clone(),
            })
            .collect();

        // A modelled field that was absent on disk is only written once it
        // carries a value.
        for field in KnownField::ALL {
            if !self.has_slot(field) && !self.field(field).is_empty() {
                children.push(Entry::string(field.default_key(), self.field(field)));
            }
        }
        Entry::map(self.key.clone(), children)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RootSlot {
    Shortcuts { key: String, layout: Vec<ListSlot> },
    Opaque(Entry),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ListSlot {
    Record,
    Opaque(Entry),
}

/// Ordered shortcut records plus whatever else the file carried.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShortcutsFile {
    pub records: Vec<ShortcutRecord>,
    root: Vec<RootSlot>,
}

impl ShortcutsFile {
    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut file = ShortcutsFile::default();
        let mut seen_shortcuts = false;

        for entry in vdf::decode(bytes)? {
            match entry.value {
                Value::Map(children)
                    if !seen_shortcuts && entry.key.eq_ignore_ascii_case(SHORTCUTS_KEY) =>
                {
                    seen_shortcuts = true;
                    let mut layout = Vec::with_capacity(children.len());
                    for child in children {
                        match child.value {
                            Value::Map(fields) => {
                                let index = file.records.len();
                                file.records
                                    .push(ShortcutRecord::from_entry(index, child.key, fields));
                                layout.push(ListSlot::Record);
                            }
                            value => layout.push(ListSlot::Opaque(Entry {
                                key: child.key,
                                value,
                            })),
                        }
                    }
                    file.root.push(RootSlot::Shortcuts {
                        key: entry.key,
                        layout,
                    });
                }
                value => file.root.push(RootSlot::Opaque(Entry {
                    key: entry.key,
                    value,
                })),
            }
        }

        Ok(file)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut records = self.records.iter();
        let mut root = Vec::with_capacity(self.root.len().max(1));
        let mut wrote_shortcuts = false;

        for slot in &self.root {
            match slot {
                RootSlot::Shortcuts { key, layout } => {
                    let mut children = Vec::with_capacity(layout.len());
                    for item in layout {
                        match item {
                            ListSlot::Record => {
                                if let Some(record) = records.next() {
                                    children.push(record.to_entry());
                                }
                            }
                            ListSlot::Opaque(entry) => children.push(entry.clone()),
                        }
                    }
                    children.extend(records.by_ref().map(ShortcutRecord::to_entry));
                    root.push(Entry::map(key.clone(), children));
                    wrote_shortcuts = true;
                }
                RootSlot::Opaque(entry) => root.push(entry.clone()),
            }
        }

        if !wrote_shortcuts && !self.records.is_empty() {
            root.push(Entry::map(
                SHORTCUTS_KEY,
                self.records.iter().map(ShortcutRecord::to_entry).collect(),
            ));
        }

        vdf::encode(&root)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::vdf::{self, Entry};

    /// A shortcut entry laid out the way current Steam clients write it.
    pub fn steam_entry(index: usize, name: &str, exe: &str, start_dir: &str) -> Entry {
        Entry::map(
            index.to_string(),
            vec![
                Entry::int32("appid", -1_000_000 - index as i32),
                Entry::string("AppName", name),
                Entry::string("Exe", exe),
                Entry::string("StartDir", start_dir),
                Entry::string("icon", ""),
                Entry::string("ShortcutPath", ""),
                Entry::string("LaunchOptions", ""),
                Entry::int32("IsHidden", 0),
                Entry::int32("AllowDesktopConfig", 1),
                Entry::int32("AllowOverlay", 1),
                Entry::int32("OpenVR", 0),
                Entry::int32("Devkit", 0),
                Entry::string("DevkitGameID", ""),
                Entry::int32("DevkitOverrideAppID", 0),
                Entry::int32("LastPlayTime", 1_717_000_000),
                Entry::string("FlatpakAppID", ""),
                Entry::map("tags", vec![Entry::string("0", "favorite")]),
            ],
        )
    }

    /// Encodes `(name, exe, start_dir)` triples as a full shortcuts blob.
    pub fn shortcuts_blob(records: &[(&str, &str, &str)]) -> Vec<u8> {
        let entries = records
            .iter()
            .enumerate()
            .map(|(index, (name, exe, dir))| steam_entry(index, name, exe, dir))
            .collect();
        vdf::encode(&[Entry::map("shortcuts", entries)])
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{shortcuts_blob, steam_entry};
    use super::*;

    #[test]
    fn decodes_modelled_fields_in_index_order() {
        let blob = shortcuts_blob(&[
            ("Celeste", "\"C:\\Games\\Celeste\\Celeste.exe\"", "\"C:\\Games\\Celeste\\\""),
            ("Hades", "D:\\Hades\\Hades.exe", "D:\\Hades"),
        ]);
        let file = ShortcutsFile::decode(&blob).expect("decode");

        assert_eq!(file.records.len(), 2);
        assert_eq!(file.records[0].index, 0);
        assert_eq!(file.records[0].key(), "0");
        assert_eq!(file.records[0].app_name, "Celeste");
        assert_eq!(file.records[0].exe, "\"C:\\Games\\Celeste\\Celeste.exe\"");
        assert_eq!(file.records[1].index, 1);
        assert_eq!(file.records[1].start_dir, "D:\\Hades");
        let opaque: Vec<&str> = file.records[1]
            .opaque_fields()
            .map(|entry| entry.key.as_str())
            .collect();
        assert_eq!(opaque.first(), Some(&"appid"));
        assert_eq!(opaque.last(), Some(&"tags"));
    }

    #[test]
    fn untouched_file_round_trips_byte_for_byte() {
        let blob = shortcuts_blob(&[
            ("A", "/opt/a/a.x86_64", "/opt/a"),
            ("B", "\"/opt/b c/b\"", "\"/opt/b c\""),
        ]);
        let file = ShortcutsFile::decode(&blob).expect("decode");
        assert_eq!(file.encode(), blob);
    }

    #[test]
    fn unusual_layouts_round_trip() {
        let root = vec![
            Entry::int32("version", 2),
            Entry::map(
                "shortcuts",
                vec![
                    Entry::map(
                        "0",
                        vec![
                            Entry::string("exe", "/legacy/game"),
                            Entry::int32("appid", 7),
                            Entry::string("appname", "Legacy"),
                            Entry::string("Exe", "duplicate key stays opaque"),
                        ],
                    ),
                    Entry::string("note", "non-map child"),
                    steam_entry(1, "Modern", "/m/game", "/m"),
                ],
            ),
            Entry::map("trailer", vec![]),
        ];
        let blob = vdf::encode(&root);
        let file = ShortcutsFile::decode(&blob).expect("decode");

        assert_eq!(file.records.len(), 2);
        assert_eq!(file.records[0].exe, "/legacy/game");
        assert_eq!(file.records[0].app_name, "Legacy");
        assert_eq!(file.records[0].start_dir, "");
        assert_eq!(file.records[1].index, 1);
        assert_eq!(file.encode(), blob);
    }

    #[test]
    fn edits_keep_field_positions() {
        let blob = shortcuts_blob(&[("A", "/opt/a/a", "/opt/a")]);
        let mut file = ShortcutsFile::decode(&blob).expect("decode");
        file.records[0].exe = "\"/usr/bin/nsgtt\" --run \"/opt/a/a\"".to_string();

        let reparsed = ShortcutsFile::decode(&file.encode()).expect("decode edited");
        let entries = vdf::decode(&file.encode()).expect("raw decode");
        let Value::Map(records) = &entries[0].value else {
            panic!("expected shortcuts map");
        };
        let Value::Map(fields) = &records[0].value else {
            panic!("expected record map");
        };
        assert_eq!(fields[2].key, "Exe");
        assert_eq!(reparsed.records[0].exe, file.records[0].exe);
        assert_eq!(reparsed.records[0].app_name, "A");
    }

    #[test]
    fn missing_start_dir_is_appended_once_set() {
        let blob = vdf::encode(&[Entry::map(
            "shortcuts",
            vec![Entry::map("0", vec![Entry::string("Exe", "/g")])],
        )]);
        let mut file = ShortcutsFile::decode(&blob).expect("decode");
        assert_eq!(file.encode(), blob);

        file.records[0].start_dir = "/".to_string();
        let reparsed = ShortcutsFile::decode(&file.encode()).expect("decode edited");
        assert_eq!(reparsed.records[0].start_dir, "/");
    }

    #[test]
    fn empty_shortcut_list_round_trips() {
        let blob = vdf::encode(&[Entry::map("shortcuts", vec![])]);
        let file = ShortcutsFile::decode(&blob).expect("decode");
        assert!(file.records.is_empty());
        assert_eq!(file.encode(), blob);
    }

    #[test]
    fn truncated_blob_is_a_format_error() {
        let mut blob = shortcuts_blob(&[("A", "/a", "/")]);
        blob.truncate(blob.len() - 1);
        assert!(matches!(
            ShortcutsFile::decode(&blob),
            Err(FormatError::Truncated { .. })
        ));
    }
}

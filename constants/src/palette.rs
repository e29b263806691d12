/// Default categorical palette, a hand-picked subset of the Crayola crayon colors.
pub struct NamedColor {
    pub name: &'static str,
    pub hex: &'static str,
}

/// Gray level (0-1) used for rows that carry no category value.
pub const GRAY_COLOR: f64 = 0.4;

/// Chosen colors in display order. Neighbouring entries are deliberately far apart
/// in hue so that consecutive categories stay distinguishable.
pub const CHOSEN_COLORS: &[NamedColor] = &[
    NamedColor { name: "Lemon Yellow", hex: "#FFF44F" },
    NamedColor { name: "Sea Green", hex: "#9FE2BF" },
    NamedColor { name: "Periwinkle", hex: "#C5D0E6" },
    NamedColor { name: "Wisteria", hex: "#CDA4DE" },
    NamedColor { name: "Carnation Pink", hex: "#FFAACC" },
    NamedColor { name: "Sepia", hex: "#A5694F" },
    NamedColor { name: "Blue-Gray", hex: "#6699CC" },
    NamedColor { name: "Orange", hex: "#FF7538" },
    NamedColor { name: "Fern", hex: "#71BC78" },
    NamedColor { name: "Blue-Green", hex: "#0D98BA" },
    NamedColor { name: "Violet-Blue", hex: "#324AB2" },
    NamedColor { name: "Orchid", hex: "#E6A8D7" },
    NamedColor { name: "Mahogany", hex: "#CD4A4A" },
    NamedColor { name: "Shadow", hex: "#8A795D" },
    NamedColor { name: "Maize", hex: "#F2C649" },
    NamedColor { name: "Asparagus", hex: "#87A96B" },
    NamedColor { name: "Sky Blue", hex: "#80DAEB" },
    NamedColor { name: "Purple Heart", hex: "#7442C8" },
    NamedColor { name: "Magenta", hex: "#F664AF" },
    NamedColor { name: "Burnt Sienna", hex: "#EA7E5D" },
    NamedColor { name: "Silver", hex: "#CDC5C2" },
    NamedColor { name: "Scarlet", hex: "#FC2847" },
    NamedColor { name: "Yellow-Green", hex: "#C5E384" },
    NamedColor { name: "Aquamarine", hex: "#78DBE2" },
    NamedColor { name: "Indigo", hex: "#5D76CB" },
    NamedColor { name: "Fuchsia", hex: "#C364C5" },
    NamedColor { name: "Salmon", hex: "#FF9BAA" },
    NamedColor { name: "Peach", hex: "#FFCFAB" },
];
